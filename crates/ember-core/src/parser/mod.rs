//! HTTP/1.1 parser adapter
//!
//! Wraps `httparse` so the connection engine can feed it an accumulating
//! buffer. A successful parse yields a [`Head`] holding byte ranges into
//! that buffer, which stays valid while more body bytes are appended.
//!
//! Header and body share one size budget. Exceeding it, a malformed request
//! line, or a bad `Content-Length` is fatal for the connection.

mod method;

pub use method::Method;

use crate::{Error, Result};
use smallvec::SmallVec;
use std::ops::Range;

/// Maximum number of headers to parse
pub const MAX_HEADERS: usize = 64;

/// Header name/value as ranges into the request buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRange {
    pub name: Range<usize>,
    pub value: Range<usize>,
}

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct Head {
    /// HTTP method as sent on the wire
    pub method: Method,
    /// Request target (path plus optional query) range
    pub target: Range<usize>,
    /// HTTP minor version (`1` for HTTP/1.1)
    pub version: u8,
    /// Header ranges in arrival order
    pub headers: SmallVec<[HeaderRange; 16]>,
    /// Offset where the body begins
    pub body_start: usize,
    /// Declared `Content-Length`, if any
    pub content_length: Option<usize>,
}

impl Head {
    /// Total bytes (head plus body) this request occupies
    pub fn total_len(&self) -> usize {
        self.body_start + self.content_length.unwrap_or(0)
    }

    /// True once `buffered` bytes cover the whole body
    pub fn is_complete(&self, buffered: usize) -> bool {
        buffered >= self.total_len()
    }

    /// Body bytes, clamped to what has been buffered
    pub fn body<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        let end = self.total_len().min(buf.len());
        &buf[self.body_start.min(end)..end]
    }
}

/// Outcome of one parse attempt
#[derive(Debug, Clone)]
pub enum ParseStatus {
    /// Need more bytes
    Incomplete,
    /// Request line and headers are complete
    Parsed(Head),
}

/// Try to parse the head of a request
///
/// `consumed` is the buffer length at the previous attempt; bytes before it
/// are known not to contain the end of the header block, so an attempt that
/// cannot have completed is skipped without re-running the parser.
pub fn parse(buf: &[u8], consumed: usize, max_size: usize) -> Result<ParseStatus> {
    let from = consumed.saturating_sub(3).min(buf.len());
    if find_header_end(&buf[from..]).is_none() {
        return incomplete(buf.len(), max_size);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let body_start = match req.parse(buf)? {
        httparse::Status::Partial => return incomplete(buf.len(), max_size),
        httparse::Status::Complete(n) => n,
    };

    let method = req
        .method
        .and_then(|m| Method::parse(m.as_bytes()))
        .ok_or_else(|| Error::InvalidMethod(req.method.unwrap_or_default().to_string()))?;
    let target = req
        .path
        .map(|p| span(buf, p.as_bytes()))
        .ok_or_else(|| Error::Parse("missing request target".into()))?;
    let version = req.version.unwrap_or(1);

    let mut ranges = SmallVec::new();
    let mut content_length: Option<usize> = None;
    for h in req.headers.iter() {
        if h.name.eq_ignore_ascii_case("content-length") {
            let len = std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| Error::Parse("invalid Content-Length".into()))?;
            if content_length.is_some_and(|prev| prev != len) {
                return Err(Error::Parse("conflicting Content-Length headers".into()));
            }
            content_length = Some(len);
        } else if h.name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(Error::Parse("Transfer-Encoding is not supported".into()));
        }
        ranges.push(HeaderRange {
            name: span(buf, h.name.as_bytes()),
            value: span(buf, h.value),
        });
    }

    let head = Head {
        method,
        target,
        version,
        headers: ranges,
        body_start,
        content_length,
    };
    if head.total_len() > max_size {
        return Err(Error::RequestTooLarge {
            size: head.total_len(),
            limit: max_size,
        });
    }
    Ok(ParseStatus::Parsed(head))
}

fn incomplete(buffered: usize, max_size: usize) -> Result<ParseStatus> {
    if buffered >= max_size {
        return Err(Error::RequestTooLarge {
            size: buffered,
            limit: max_size,
        });
    }
    Ok(ParseStatus::Incomplete)
}

/// Position just past the blank line ending the header block
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => Some(i + 2),
            [b'\r', b'\n', ..] => Some(i + 3),
            _ => None,
        }
    })
}

/// Range of `part` inside `buf`; `part` must be a subslice of `buf`
fn span(buf: &[u8], part: &[u8]) -> Range<usize> {
    if part.is_empty() {
        return 0..0;
    }
    let start = part.as_ptr() as usize - buf.as_ptr() as usize;
    start..start + part.len()
}
