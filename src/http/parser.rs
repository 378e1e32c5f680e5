use crate::http::request::{Method, Request};
use std::collections::HashMap;

/// Upper bound on the header section before a request is rejected.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    /// Transfer coding other than a final `chunked`
    UnsupportedTransferEncoding,
    InvalidChunk,
    HeadersTooLarge,
    Incomplete,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        headers.insert(key.trim().to_string(), value.trim().to_string());
    }

    // Transfer-Encoding takes precedence over Content-Length
    let (body, body_len) = match header_value(&headers, "Transfer-Encoding") {
        Some(coding) if is_chunked(coding) => decode_chunked(body_bytes)?,
        Some(_) => return Err(ParseError::UnsupportedTransferEncoding),
        None => {
            let content_length = header_value(&headers, "Content-Length")
                .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
                .transpose()?
                .unwrap_or(0);

            if body_bytes.len() < content_length {
                return Err(ParseError::Incomplete);
            }
            (body_bytes[..content_length].to_vec(), content_length)
        }
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    let total_consumed = headers_end + 4 + body_len;
    Ok((request, total_consumed))
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// `chunked` must be the final coding applied to a request body.
fn is_chunked(coding: &str) -> bool {
    coding
        .rsplit(',')
        .next()
        .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
}

/// Decodes a chunked body.
///
/// Returns the payload and the number of bytes the encoded body occupied,
/// trailers included. Trailer fields are discarded.
fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line = next_line(buf, pos)?;
        pos += line.len() + 2;

        let size_str = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
        let size_str = size_str.split(';').next().unwrap_or_default().trim();
        if size_str.is_empty() || !size_str.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidChunk);
        }
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;

        if size == 0 {
            break;
        }

        let end = pos
            .checked_add(size)
            .filter(|end| end.checked_add(2).is_some())
            .ok_or(ParseError::InvalidChunk)?;
        if buf.len() < end + 2 {
            return Err(ParseError::Incomplete);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        body.extend_from_slice(&buf[pos..end]);
        pos = end + 2;
    }

    // Trailer section ends with an empty line
    loop {
        let line = next_line(buf, pos)?;
        pos += line.len() + 2;
        if line.is_empty() {
            return Ok((body, pos));
        }
    }
}

/// The line starting at `pos`, without its CRLF.
fn next_line(buf: &[u8], pos: usize) -> Result<&[u8], ParseError> {
    let rest = buf.get(pos..).unwrap_or_default();
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => Ok(&rest[..end]),
        None if rest.len() > MAX_HEADER_BYTES => Err(ParseError::InvalidChunk),
        None => Err(ParseError::Incomplete),
    }
}

pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
