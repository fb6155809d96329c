use std::fmt;

use crate::http::request::{Method, RequestHead, Version};

/// Request heads larger than this are rejected instead of buffered.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidVersion,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    InvalidMultipart,
    HeadTooLarge,
    Incomplete,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::InvalidRequest => "invalid request line",
            ParseError::InvalidMethod => "unsupported method",
            ParseError::InvalidVersion => "unsupported HTTP version",
            ParseError::InvalidHeader => "malformed header",
            ParseError::InvalidContentLength => "invalid Content-Length",
            ParseError::InvalidChunk => "malformed chunked body",
            ParseError::InvalidMultipart => "malformed multipart body",
            ParseError::HeadTooLarge => "request head too large",
            ParseError::Incomplete => "incomplete request",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Parses a request head (request line and headers) from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied, including the
/// terminating blank line. The body, if any, is left for the caller.
pub fn parse_head(buf: &[u8]) -> Result<(RequestHead, usize), ParseError> {
    // Look for header/body separator
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let version = Version::from_str(version).ok_or(ParseError::InvalidVersion)?;

    // Headers
    let mut headers = Vec::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        headers.push((key.to_string(), value.trim().to_string()));
    }

    let request = RequestHead {
        method,
        target: target.to_string(),
        version,
        headers,
    };

    Ok((request, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
