//! Extension to content-type lookup used by `Response::send_file`

use std::path::Path;

/// Fallback for unknown or missing extensions
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Resolve the content type for a file path by its extension
pub fn from_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(from_extension)
        .unwrap_or(OCTET_STREAM)
}

/// Resolve the content type for a bare extension (case-insensitive)
pub fn from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        // Text
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv",

        // Images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",

        // Audio/Video
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",

        // Fonts
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",

        // Archives and documents
        "zip" => "application/zip",
        "gz" | "gzip" => "application/gzip",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",

        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type() {
        assert_eq!(from_path(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(from_path(Path::new("style.CSS")), "text/css; charset=utf-8");
        assert_eq!(from_path(Path::new("a/b/image.png")), "image/png");
        assert_eq!(from_path(Path::new("unknown")), OCTET_STREAM);
        assert_eq!(from_path(Path::new("archive.rar")), OCTET_STREAM);
    }
}
