//! Cookies
//!
//! Parsing of the request `Cookie` header and serialization of
//! `Set-Cookie` lines for the response.

use crate::response::header_safe;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cookie SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes attached to a `Set-Cookie` line
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<SystemTime>,
    pub max_age: Option<i64>, // Seconds
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// Serialize one `Set-Cookie` header value
pub fn to_header_value(name: &str, value: &str, opts: &CookieOptions) -> String {
    let mut parts = vec![format!("{}={}", header_safe(name), header_safe(value))];

    if let Some(ref path) = opts.path {
        parts.push(format!("Path={}", header_safe(path)));
    }
    if let Some(ref domain) = opts.domain {
        parts.push(format!("Domain={}", header_safe(domain)));
    }
    if let Some(max_age) = opts.max_age {
        parts.push(format!("Max-Age={}", max_age));
    }
    if let Some(expires) = opts.expires {
        parts.push(format!("Expires={}", http_date(expires)));
    }
    if opts.secure {
        parts.push("Secure".to_string());
    }
    if opts.http_only {
        parts.push("HttpOnly".to_string());
    }
    if let Some(same_site) = opts.same_site {
        parts.push(format!("SameSite={}", same_site.as_str()));
    }

    parts.join("; ")
}

/// Split a `Cookie` header into name/value pairs
///
/// A name defined twice keeps the last value, in the position of its first
/// definition.
pub fn parse_cookie_header(header: &str) -> Vec<(&str, &str)> {
    let mut cookies: Vec<(&str, &str)> = Vec::new();

    for part in header.split(';') {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        match cookies.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => cookies.push((name, value)),
        }
    }

    cookies
}

/// Format a timestamp as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`)
///
/// Times outside `1970..=9999` are clamped to the nearest representable
/// date.
pub fn http_date(at: SystemTime) -> String {
    let latest = UNIX_EPOCH + Duration::from_secs(LAST_HTTP_DATE_SECS);
    httpdate::fmt_http_date(at.clamp(UNIX_EPOCH, latest))
}

/// `Fri, 31 Dec 9999 23:59:59 GMT`
const LAST_HTTP_DATE_SECS: u64 = 253_402_300_799;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_serialize() {
        let opts = CookieOptions::new()
            .path("/")
            .domain("example.com")
            .max_age(3600)
            .secure()
            .http_only()
            .same_site(SameSite::Strict);

        let header = to_header_value("session", "abc123", &opts);
        assert_eq!(
            header,
            "session=abc123; Path=/; Domain=example.com; Max-Age=3600; Secure; HttpOnly; SameSite=Strict"
        );
    }

    #[test]
    fn test_cookie_plain() {
        assert_eq!(to_header_value("a", "b", &CookieOptions::default()), "a=b");
    }

    #[test]
    fn test_cookie_expires() {
        let at = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let header = to_header_value("id", "1", &CookieOptions::new().expires(at));
        assert_eq!(header, "id=1; Expires=Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_http_date_epoch() {
        assert_eq!(http_date(UNIX_EPOCH), "Thu, 01 Jan 1970 00:00:00 GMT");
        let leap = UNIX_EPOCH + Duration::from_secs(951_782_400);
        assert_eq!(http_date(leap), "Tue, 29 Feb 2000 00:00:00 GMT");
    }

    #[test]
    fn test_http_date_clamped() {
        let before = UNIX_EPOCH - Duration::from_secs(60);
        assert_eq!(http_date(before), "Thu, 01 Jan 1970 00:00:00 GMT");
        let far = UNIX_EPOCH + Duration::from_secs(LAST_HTTP_DATE_SECS + 86_400);
        assert_eq!(http_date(far), "Fri, 31 Dec 9999 23:59:59 GMT");
    }

    #[test]
    fn test_cookie_strips_line_breaks() {
        let opts = CookieOptions::new().path("/\r\nSet-Cookie: admin=1");
        let header = to_header_value("sid", "x\r\ny", &opts);
        assert_eq!(header, "sid=xy; Path=/Set-Cookie: admin=1");
        assert!(!header.contains('\r') && !header.contains('\n'));
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("session=abc123; theme=dark; lang=en");
        assert_eq!(
            cookies,
            vec![("session", "abc123"), ("theme", "dark"), ("lang", "en")]
        );
    }

    #[test]
    fn test_parse_cookie_last_wins() {
        let cookies = parse_cookie_header("a=1; b=2; a=3");
        assert_eq!(cookies, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_parse_cookie_skips_garbage() {
        let cookies = parse_cookie_header("novalue; =x; ok=\"quoted\";;");
        assert_eq!(cookies, vec![("ok", "quoted")]);
    }
}
