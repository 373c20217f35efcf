//! HTTP Request types
//!
//! A [`Request`] is built once from the parsed head and the buffered bytes.
//! Everything it exposes (path, headers, decoded query and form pairs,
//! cookies, body) is copied into the request's [`Arena`], so the borrow
//! checker ties every accessor result to the arena's lifetime.

use crate::arena::Arena;
use crate::cookie::parse_cookie_header;
use crate::parser::{self, Head, Method, ParseStatus};
use crate::{Error, Result};
use smallvec::SmallVec;
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Decoded key/value pairs borrowed from the arena
pub type Pairs<'a> = SmallVec<[(&'a str, &'a str); 8]>;

/// Middleware-contributed values keyed by name
#[derive(Default)]
pub struct Locals {
    values: HashMap<String, Box<dyn Any>>,
}

impl Locals {
    pub fn insert<T: Any>(&mut self, key: impl Into<String>, value: T) -> Option<Box<dyn Any>> {
        self.values.insert(key.into(), Box::new(value))
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        let value = self.values.remove(key)?;
        match value.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(other) => {
                // wrong type requested, keep the value where it was
                self.values.insert(key.to_string(), other);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Locals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// HTTP Request
#[derive(Debug)]
pub struct Request<'a> {
    method: Method,
    original_method: Method,
    path: &'a str,
    query: Option<&'a str>,
    version: u8,
    headers: SmallVec<[(&'a str, &'a str); 16]>,
    query_pairs: Pairs<'a>,
    form: Pairs<'a>,
    cookies: Pairs<'a>,
    params: SmallVec<[(Arc<str>, &'a str); 4]>,
    body: &'a [u8],
    peer_addr: Option<SocketAddr>,
    locals: Locals,
}

impl<'a> Request<'a> {
    /// Build a request from a parsed head, copying everything into `arena`
    pub fn from_head(
        arena: &'a Arena,
        buf: &[u8],
        head: &Head,
        peer_addr: Option<SocketAddr>,
    ) -> Result<Self> {
        let target = std::str::from_utf8(&buf[head.target.clone()])
            .map_err(|_| Error::Parse("request target is not valid UTF-8".into()))?;
        let target = arena.alloc_str(target)?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let mut headers = SmallVec::new();
        for h in &head.headers {
            let name = std::str::from_utf8(&buf[h.name.clone()])
                .map_err(|_| Error::Parse("header name is not valid UTF-8".into()))?;
            let value = String::from_utf8_lossy(&buf[h.value.clone()]);
            headers.push((arena.alloc_str(name)?, arena.alloc_str(&value)?));
        }

        let query_pairs = match query {
            Some(q) => decode_pairs(arena, q, false)?,
            None => Pairs::new(),
        };

        let mut req = Request {
            method: head.method,
            original_method: head.method,
            path,
            query,
            version: head.version,
            headers,
            query_pairs,
            form: Pairs::new(),
            cookies: Pairs::new(),
            params: SmallVec::new(),
            body: &[],
            peer_addr,
            locals: Locals::default(),
        };

        if head.method.has_body() {
            req.body = arena.alloc_bytes(head.body(buf))?;
            if req.is_form_encoded() {
                let raw = std::str::from_utf8(req.body)
                    .map_err(|_| Error::Parse("form body is not valid UTF-8".into()))?;
                req.form = decode_pairs(arena, raw, true)?;
            }
        }

        for &(name, value) in req.headers.iter() {
            if !name.eq_ignore_ascii_case("cookie") {
                continue;
            }
            for (k, v) in parse_cookie_header(value) {
                match req.cookies.iter_mut().find(|(n, _)| *n == k) {
                    Some(existing) => existing.1 = v,
                    None => req.cookies.push((k, v)),
                }
            }
        }

        if let Some(target) = req.form("_method").and_then(Method::override_target) {
            tracing::trace!(from = %req.method, to = %target, "method override");
            req.method = target;
        }

        Ok(req)
    }

    /// Method used for routing (after any `_method` override)
    pub fn method(&self) -> Method {
        self.method
    }

    /// Method from the request line
    pub fn original_method(&self) -> Method {
        self.original_method
    }

    /// Request path (without query string)
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Raw query string (without leading ?)
    pub fn query_string(&self) -> Option<&'a str> {
        self.query
    }

    /// HTTP minor version
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn headers(&self) -> &[(&'a str, &'a str)] {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&'a str> {
        self.header("content-type")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn host(&self) -> Option<&'a str> {
        self.header("host")
    }

    pub fn referer(&self) -> Option<&'a str> {
        self.header("referer")
    }

    /// True for requests sent with `X-Requested-With: XMLHttpRequest`
    pub fn is_xhr(&self) -> bool {
        self.header("x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
    }

    /// First hop listed in `X-Forwarded-For`
    pub fn forwarded_for(&self) -> Option<&'a str> {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// First decoded query value for `name`
    pub fn query(&self, name: &str) -> Option<&'a str> {
        lookup(&self.query_pairs, name)
    }

    pub fn query_pairs(&self) -> &[(&'a str, &'a str)] {
        &self.query_pairs
    }

    /// Get a route parameter (raw, not percent-decoded)
    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| *v)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &'a str)> {
        self.params.iter().map(|(k, v)| (&**k, *v))
    }

    pub(crate) fn set_params(&mut self, params: impl IntoIterator<Item = (Arc<str>, &'a str)>) {
        self.params.clear();
        self.params.extend(params);
    }

    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        lookup(&self.cookies, name)
    }

    pub fn cookies(&self) -> &[(&'a str, &'a str)] {
        &self.cookies
    }

    /// First decoded form field for `name`
    pub fn form(&self, name: &str) -> Option<&'a str> {
        lookup(&self.form, name)
    }

    pub fn form_pairs(&self) -> &[(&'a str, &'a str)] {
        &self.form
    }

    /// Raw body bytes (empty unless the method carries a body)
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    pub fn body_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.body).ok()
    }

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }

    /// Attach a middleware value under `key`
    pub fn set_local<T: Any>(&mut self, key: impl Into<String>, value: T) {
        self.locals.insert(key, value);
    }

    pub fn local<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals.get(key)
    }

    fn is_form_encoded(&self) -> bool {
        self.content_type().is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|m| m.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        })
    }
}

/// Builder for constructing requests
///
/// Produces the raw request bytes and runs them through the same parser and
/// construction path the server uses.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    peer_addr: Option<SocketAddr>,
}

impl RequestBuilder {
    /// Create a new builder; `target` may include a query string
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: Vec::new(),
            peer_addr: None,
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set body; `Content-Length` is added when missing
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a form-urlencoded body
    pub fn form(self, body: impl Into<Vec<u8>>) -> Self {
        self.header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
    }

    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Serialize to HTTP/1.1 wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.body.len());
        buf.extend_from_slice(self.method.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.target.as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        let has_length = self
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if !self.body.is_empty() && !has_length {
            buf.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Build the request inside `arena`
    pub fn build<'a>(&self, arena: &'a Arena) -> Result<Request<'a>> {
        let raw = self.to_bytes();
        match parser::parse(&raw, 0, usize::MAX)? {
            ParseStatus::Parsed(head) => Request::from_head(arena, &raw, &head, self.peer_addr),
            ParseStatus::Incomplete => Err(Error::Parse("incomplete request".into())),
        }
    }
}

fn lookup<'a>(pairs: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

/// Split `a=1&b=2` into decoded pairs stored in the arena
fn decode_pairs<'a>(arena: &'a Arena, raw: &'a str, plus_as_space: bool) -> Result<Pairs<'a>> {
    let mut pairs = Pairs::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = store(arena, url_decode(key, plus_as_space))?;
        let value = store(arena, url_decode(value, plus_as_space))?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn store<'a>(arena: &'a Arena, value: Cow<'a, str>) -> Result<&'a str> {
    match value {
        Cow::Borrowed(s) => Ok(s),
        Cow::Owned(s) => arena.alloc_str(&s),
    }
}

/// Percent-decode a URL component
///
/// Malformed escapes are kept literally. With `plus_as_space`, `+` becomes a
/// space before decoding (form bodies); otherwise it is left alone.
pub fn url_decode(s: &str, plus_as_space: bool) -> Cow<'_, str> {
    if !s.contains('%') && !(plus_as_space && s.contains('+')) {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' if plus_as_space => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }

    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::try_with_capacity(64 * 1024).unwrap()
    }

    #[test]
    fn test_request_header() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Get, "/")
            .header("Content-Type", "application/json")
            .build(&arena)
            .unwrap();

        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.content_type(), Some("application/json"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn test_path_and_query_split() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Get, "/search?a=1&b=two%20words")
            .build(&arena)
            .unwrap();

        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("a=1&b=two%20words"));
        assert_eq!(req.query("a"), Some("1"));
        assert_eq!(req.query("b"), Some("two words"));
        assert_eq!(req.query_pairs(), &[("a", "1"), ("b", "two words")]);
    }

    #[test]
    fn test_query_plus_is_literal() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Get, "/?q=a+b&k%3D=v&flag")
            .build(&arena)
            .unwrap();
        assert_eq!(req.query("q"), Some("a+b"));
        assert_eq!(req.query("k="), Some("v"));
        assert_eq!(req.query("flag"), Some(""));
    }

    #[test]
    fn test_form_body() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Post, "/submit")
            .form("param1=12%2B3&param2=3+4%205")
            .build(&arena)
            .unwrap();

        assert_eq!(req.form("param1"), Some("12+3"));
        assert_eq!(req.form("param2"), Some("3 4 5"));
        assert_eq!(req.body(), b"param1=12%2B3&param2=3+4%205");
    }

    #[test]
    fn test_form_content_type_with_charset() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Put, "/")
            .header("Content-Type", "Application/X-WWW-Form-Urlencoded; charset=UTF-8")
            .body("a=1")
            .build(&arena)
            .unwrap();
        assert_eq!(req.form("a"), Some("1"));
    }

    #[test]
    fn test_non_form_body_is_raw() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Post, "/")
            .header("Content-Type", "application/json")
            .body(r#"{"a":1}"#)
            .build(&arena)
            .unwrap();
        assert_eq!(req.body_str(), Some(r#"{"a":1}"#));
        assert!(req.form_pairs().is_empty());
    }

    #[test]
    fn test_body_ignored_for_get() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Get, "/")
            .body("ignored")
            .build(&arena)
            .unwrap();
        assert!(req.body().is_empty());
    }

    #[test]
    fn test_method_override() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Post, "/items/1")
            .form("_method=delete")
            .build(&arena)
            .unwrap();
        assert_eq!(req.method(), Method::Delete);
        assert_eq!(req.original_method(), Method::Post);

        let req = RequestBuilder::new(Method::Post, "/items/1")
            .form("_method=GET")
            .build(&arena)
            .unwrap();
        assert_eq!(req.method(), Method::Post);
    }

    #[test]
    fn test_cookies_last_wins() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Get, "/")
            .header("Cookie", "sid=abc; theme=dark")
            .header("Cookie", "sid=xyz")
            .build(&arena)
            .unwrap();
        assert_eq!(req.cookie("sid"), Some("xyz"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookies().len(), 2);
    }

    #[test]
    fn test_convenience_headers() {
        let arena = arena();
        let req = RequestBuilder::new(Method::Get, "/")
            .header("Host", "example.com")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-Forwarded-For", "10.0.0.1, 10.0.0.2")
            .header("Referer", "/from")
            .build(&arena)
            .unwrap();
        assert_eq!(req.host(), Some("example.com"));
        assert!(req.is_xhr());
        assert_eq!(req.forwarded_for(), Some("10.0.0.1"));
        assert_eq!(req.referer(), Some("/from"));
    }

    #[test]
    fn test_locals() {
        let arena = arena();
        let mut req = RequestBuilder::new(Method::Get, "/").build(&arena).unwrap();
        req.set_local("user_id", 42u32);
        req.set_local("name", String::from("ada"));

        assert_eq!(req.local::<u32>("user_id"), Some(&42));
        assert_eq!(req.local::<String>("name").map(String::as_str), Some("ada"));
        assert_eq!(req.local::<u64>("user_id"), None);
        assert_eq!(req.locals_mut().remove::<u64>("user_id"), None);
        assert!(req.locals().contains("user_id"));
        assert_eq!(req.locals_mut().remove::<u32>("user_id"), Some(42));
        assert_eq!(req.locals().len(), 1);
    }

    #[test]
    fn test_arena_exhaustion() {
        let arena = Arena::try_with_capacity(64).unwrap();
        let err = RequestBuilder::new(Method::Post, "/upload")
            .body(vec![b'x'; 32 * 1024])
            .build(&arena)
            .unwrap_err();
        assert!(matches!(err, Error::OutOfArena { .. }));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("plain", false), "plain");
        assert!(matches!(url_decode("plain", true), Cow::Borrowed(_)));
        assert_eq!(url_decode("a%20b", false), "a b");
        assert_eq!(url_decode("a+b", true), "a b");
        assert_eq!(url_decode("a+b", false), "a+b");
        assert_eq!(url_decode("100%", false), "100%");
        assert_eq!(url_decode("%zz%4", false), "%zz%4");
        assert_eq!(url_decode("caf%C3%A9", false), "café");
    }
}
