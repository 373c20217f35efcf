//! HTTP Response types
//!
//! A [`Response`] accumulates status, headers and cookies while the router
//! runs. The first `send` family call serializes everything into one byte
//! stream that the connection writes to the socket; every later call is a
//! no-op.

use crate::cookie::{self, CookieOptions};
use crate::mime;
use bytes::Bytes;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    // 1xx Informational
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);

    // 2xx Success
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NO_CONTENT: StatusCode = StatusCode(204);

    // 3xx Redirection
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const PERMANENT_REDIRECT: StatusCode = StatusCode(308);

    // 4xx Client Errors
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const GONE: StatusCode = StatusCode(410);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const UNPROCESSABLE_ENTITY: StatusCode = StatusCode(422);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);

    // 5xx Server Errors
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the IANA reason phrase, `Unknown` for unregistered codes
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            102 => "Processing",
            103 => "Early Hints",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            207 => "Multi-Status",
            208 => "Already Reported",
            226 => "IM Used",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Content Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            421 => "Misdirected Request",
            422 => "Unprocessable Content",
            423 => "Locked",
            424 => "Failed Dependency",
            425 => "Too Early",
            426 => "Upgrade Required",
            428 => "Precondition Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            451 => "Unavailable For Legal Reasons",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            506 => "Variant Also Negotiates",
            507 => "Insufficient Storage",
            508 => "Loop Detected",
            510 => "Not Extended",
            511 => "Network Authentication Required",
            _ => "Unknown",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Check if this is a redirect status (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.0)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Application error carried on the response error channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Status used by the default fallback when no error handler sends
    pub status: StatusCode,
    pub message: String,
}

impl HandlerError {
    pub fn new(status: impl Into<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<crate::Error> for HandlerError {
    fn from(e: crate::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::internal(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::internal(message)
    }
}

/// HTTP Response
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    /// Ordered, one entry per header name
    headers: SmallVec<[(String, String); 8]>,
    /// Serialized `Set-Cookie` values, one per `cookie` call
    cookies: SmallVec<[String; 4]>,
    /// Serialized response, present once sent
    wire: Option<Bytes>,
    error: Option<HandlerError>,
    error_handled: bool,
    referer: Option<String>,
}

impl Response {
    /// Create an empty 200 response
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: SmallVec::new(),
            cookies: SmallVec::new(),
            wire: None,
            error: None,
            error_handled: false,
            referer: None,
        }
    }

    /// Create a response that resolves `redirect("back")` to `referer`
    pub fn with_referer(referer: Option<&str>) -> Self {
        let mut res = Self::new();
        res.referer = referer.map(str::to_string);
        res
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: impl Into<StatusCode>) -> &mut Self {
        self.status = status.into();
        self
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any earlier value for the same name
    ///
    /// CR, LF and NUL are stripped from both name and value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = header_safe(&name.into()).into_owned();
        let value = value.into();
        let value = match header_safe(&value) {
            Cow::Borrowed(_) => value,
            Cow::Owned(clean) => {
                tracing::debug!(header = %name, "stripped line breaks from header value");
                clean
            }
        };
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self
    }

    /// Headers in the order they were first set
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set the `Location` header
    pub fn location(&mut self, url: &str) -> &mut Self {
        let url = self.resolve_location(url);
        self.set_header("Location", url)
    }

    /// Append a `Set-Cookie` line
    pub fn cookie(&mut self, name: &str, value: &str, opts: &CookieOptions) -> &mut Self {
        self.cookies.push(cookie::to_header_value(name, value, opts));
        self
    }

    /// Append a `Set-Cookie` line that expires `name` immediately
    pub fn clear_cookie(&mut self, name: &str, opts: &CookieOptions) -> &mut Self {
        let opts = CookieOptions {
            max_age: Some(0),
            expires: Some(UNIX_EPOCH),
            ..opts.clone()
        };
        self.cookie(name, "", &opts)
    }

    /// Pending `Set-Cookie` values
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// True once a body has been written
    pub fn did_send(&self) -> bool {
        self.wire.is_some()
    }

    /// Serialize and commit the response
    ///
    /// Returns `false` without touching anything when a body was already
    /// sent.
    pub fn send(&mut self, body: impl Into<Bytes>) -> bool {
        if self.did_send() {
            tracing::trace!(status = self.status.0, "response already sent, ignoring send");
            return false;
        }
        let body = body.into();
        if self.header("content-type").is_none() {
            self.set_header("Content-Type", "text/html");
        }
        self.set_header("Content-Length", body.len().to_string());
        self.set_header("Connection", "close");
        self.wire = Some(self.serialize(&body));
        true
    }

    /// Send with a `text/plain` content type
    pub fn send_text(&mut self, body: impl Into<Bytes>) -> bool {
        if self.did_send() {
            return false;
        }
        self.set_header("Content-Type", "text/plain; charset=utf-8");
        self.send(body)
    }

    /// Send an already-serialized JSON document
    pub fn send_json(&mut self, body: impl Into<Bytes>) -> bool {
        if self.did_send() {
            return false;
        }
        self.set_header("Content-Type", "application/json");
        self.send(body)
    }

    /// Send a file's contents with a content type chosen by extension
    ///
    /// A missing file is reported as a 404 through the error channel.
    pub fn send_file(&mut self, path: impl AsRef<Path>) -> bool {
        if self.did_send() {
            return false;
        }
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(contents) => {
                if self.header("content-type").is_none() {
                    self.set_header("Content-Type", mime::from_path(path));
                }
                self.send(contents)
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "send_file failed");
                let err = match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        HandlerError::not_found(format!("File not found: {}", path.display()))
                    }
                    _ => HandlerError::from(e),
                };
                self.error(err);
                false
            }
        }
    }

    /// Send a 302 pointing at `url`; `back` means the request's Referer
    pub fn redirect(&mut self, url: &str) -> bool {
        if self.did_send() {
            return false;
        }
        let target = header_safe(&self.resolve_location(url)).into_owned();
        self.set_status(StatusCode::FOUND);
        self.set_header("Location", target.clone());
        let escaped = html_escape(&target);
        self.send(format!(
            "<p>{}. Redirecting to <a href=\"{}\">{}</a></p>",
            StatusCode::FOUND.reason_phrase(),
            escaped,
            escaped
        ))
    }

    /// Report an application error
    ///
    /// Normal route dispatch is skipped for the rest of the request and the
    /// router's error handlers get a chance to produce the output.
    pub fn error(&mut self, err: impl Into<HandlerError>) {
        let err = err.into();
        tracing::debug!(error = %err, "application error raised");
        self.error = Some(err);
        self.error_handled = false;
    }

    /// The error raised through [`Response::error`], if any
    pub fn error_value(&self) -> Option<&HandlerError> {
        self.error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Raised and not yet claimed by an error handler
    pub(crate) fn has_pending_error(&self) -> bool {
        self.error.is_some() && !self.error_handled
    }

    pub(crate) fn mark_error_handled(&mut self) {
        self.error_handled = true;
    }

    /// Serialized bytes, once sent
    pub fn wire(&self) -> Option<&Bytes> {
        self.wire.as_ref()
    }

    pub fn into_wire(self) -> Option<Bytes> {
        self.wire
    }

    /// Body of the sent response (after the blank line)
    pub fn sent_body(&self) -> Option<&[u8]> {
        let wire = self.wire.as_ref()?;
        let pos = wire.windows(4).position(|w| w == b"\r\n\r\n")?;
        Some(&wire[pos + 4..])
    }

    fn resolve_location(&self, url: &str) -> String {
        if url == "back" {
            return self.referer.clone().unwrap_or_else(|| "/".to_string());
        }
        url.to_string()
    }

    /// Serialize to HTTP/1.1 wire format
    fn serialize(&self, body: &[u8]) -> Bytes {
        let mut buf = Vec::with_capacity(256 + body.len());

        // Status line
        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.0.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.reason_phrase().as_bytes());
        buf.extend_from_slice(b"\r\n");

        // Headers
        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        for value in &self.cookies {
            buf.extend_from_slice(b"Set-Cookie: ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        // End of headers
        buf.extend_from_slice(b"\r\n");

        // Body
        buf.extend_from_slice(body);

        Bytes::from(buf)
    }
}

/// Drop the bytes that would end a header line early
pub(crate) fn header_safe(s: &str) -> Cow<'_, str> {
    if s.contains(['\r', '\n', '\0']) {
        Cow::Owned(s.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect())
    } else {
        Cow::Borrowed(s)
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_str(res: &Response) -> String {
        String::from_utf8(res.wire().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_status_code() {
        assert!(StatusCode::OK.is_success());
        assert!(StatusCode::FOUND.is_redirect());
        assert!(StatusCode::NOT_FOUND.is_client_error());
        assert!(StatusCode::INTERNAL_SERVER_ERROR.is_server_error());
        assert_eq!(StatusCode(418).reason_phrase(), "Unknown");
        assert_eq!(StatusCode(451).reason_phrase(), "Unavailable For Legal Reasons");
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
    }

    #[test]
    fn test_send_defaults() {
        let mut res = Response::new();
        assert!(res.send("Hello"));

        let s = wire_str(&res);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/html\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
        assert_eq!(res.sent_body(), Some(&b"Hello"[..]));
    }

    #[test]
    fn test_send_is_idempotent() {
        let mut res = Response::new();
        assert!(res.send("first"));
        res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!res.send("second"));
        assert!(!res.send_text("third"));
        assert!(!res.redirect("/elsewhere"));

        let s = wire_str(&res);
        assert!(s.starts_with("HTTP/1.1 200 OK"));
        assert!(s.ends_with("first"));
    }

    #[test]
    fn test_headers_last_set_wins() {
        let mut res = Response::new();
        res.set_header("X-Custom", "one")
            .set_header("X-Other", "a")
            .set_header("x-custom", "two");

        let headers: Vec<_> = res.headers().collect();
        assert_eq!(headers, vec![("X-Custom", "two"), ("X-Other", "a")]);

        res.remove_header("X-OTHER");
        assert_eq!(res.header("x-other"), None);
    }

    #[test]
    fn test_explicit_content_type_kept() {
        let mut res = Response::new();
        res.set_header("Content-Type", "application/xml");
        res.send("<a/>");
        assert!(wire_str(&res).contains("Content-Type: application/xml\r\n"));
    }

    #[test]
    fn test_cookies_append() {
        let mut res = Response::new();
        res.cookie("a", "1", &CookieOptions::new().path("/"))
            .cookie("a", "2", &CookieOptions::new().http_only());
        res.send("");

        let s = wire_str(&res);
        assert!(s.contains("Set-Cookie: a=1; Path=/\r\n"));
        assert!(s.contains("Set-Cookie: a=2; HttpOnly\r\n"));
        assert_eq!(res.cookies().len(), 2);
    }

    #[test]
    fn test_clear_cookie() {
        let mut res = Response::new();
        res.clear_cookie("sid", &CookieOptions::new().path("/"));
        assert_eq!(
            res.cookies()[0],
            "sid=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn test_redirect() {
        let mut res = Response::new();
        assert!(res.redirect("/login"));
        let s = wire_str(&res);
        assert!(s.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(s.contains("Location: /login\r\n"));
    }

    #[test]
    fn test_redirect_back() {
        let mut res = Response::with_referer(Some("/previous"));
        res.redirect("back");
        assert_eq!(res.header("location"), Some("/previous"));

        let mut res = Response::new();
        res.redirect("back");
        assert_eq!(res.header("location"), Some("/"));
    }

    #[test]
    fn test_header_line_breaks_stripped() {
        let mut res = Response::new();
        res.set_header("X-Bad\r\nName", "a\r\nSet-Cookie: admin=1");
        assert_eq!(res.header("X-BadName"), Some("aSet-Cookie: admin=1"));

        res.send("");
        let s = wire_str(&res);
        assert!(!s.contains("\r\nSet-Cookie"));
        assert!(s.contains("X-BadName: aSet-Cookie: admin=1\r\n"));
    }

    #[test]
    fn test_redirect_cannot_inject_headers() {
        let mut res = Response::new();
        res.redirect("/home\r\nSet-Cookie: admin=1\r\n\r\n<script>x</script>");
        let s = wire_str(&res);
        assert!(s.contains("Location: /homeSet-Cookie: admin=1<script>x</script>\r\n"));
        assert!(!s.contains("\r\nSet-Cookie"));
        assert!(!s.contains("<script>"));
        assert!(s.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_send_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"ok":true}"#).unwrap();

        let mut res = Response::new();
        assert!(res.send_file(&path));
        let s = wire_str(&res);
        assert!(s.contains("Content-Type: application/json\r\n"));
        assert!(s.ends_with(r#"{"ok":true}"#));
    }

    #[test]
    fn test_send_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut res = Response::new();
        assert!(!res.send_file(dir.path().join("nope.txt")));
        assert!(!res.did_send());
        assert_eq!(res.error_value().unwrap().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_channel() {
        let mut res = Response::new();
        assert!(!res.has_error());
        res.error("boom");
        assert!(res.has_pending_error());
        assert_eq!(res.error_value().unwrap().status, StatusCode::INTERNAL_SERVER_ERROR);
        res.mark_error_handled();
        assert!(!res.has_pending_error());
        assert!(res.has_error());
    }
}
