//! Request parameter extraction.
//!
//! Parameters come from three places: the query string, the body (for form
//! encodings) and the headers (as `HTTP_*` entries). Values stay as raw
//! bytes because a `msgpack` parameter is binary.

use std::collections::HashMap;

use bytes::Bytes;

use crate::http::parser::ParseError;

/// Parameter name to raw value.
pub type Params = HashMap<String, Bytes>;

/// Parses `application/x-www-form-urlencoded` data.
///
/// Pairs are separated by `&` or `;`. When a name repeats, the first value
/// is kept.
pub fn parse_query(input: &[u8]) -> Params {
    let mut params = Params::new();
    for pair in input.split(|&b| b == b'&' || b == b';') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.iter().position(|&b| b == b'=') {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, &[][..]),
        };
        let key = String::from_utf8_lossy(&unescape_form(key)).into_owned();
        params
            .entry(key)
            .or_insert_with(|| Bytes::from(unescape_form(value)));
    }
    params
}

fn unescape_form(input: &[u8]) -> Vec<u8> {
    let plus_decoded: Vec<u8> = input
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    urlencoding::decode_binary(&plus_decoded).into_owned()
}

/// Extracts the boundary from a `multipart/form-data` content type.
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let (mime, rest) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    rest.split(';').find_map(|attr| {
        let (name, value) = attr.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Parses a `multipart/form-data` body into parameters.
///
/// Each part's `Content-Disposition` name becomes the parameter name and the
/// part content its value. Parts without a name are skipped.
pub fn parse_form_data(body: &[u8], boundary: &str) -> Result<Params, ParseError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut params = Params::new();

    let start = find(body, &delimiter).ok_or(ParseError::InvalidMultipart)?;
    let mut rest = &body[start + delimiter.len()..];

    loop {
        if rest.starts_with(b"--") {
            return Ok(params);
        }
        rest = rest
            .strip_prefix(b"\r\n")
            .ok_or(ParseError::InvalidMultipart)?;

        let head_end = find(rest, b"\r\n\r\n").ok_or(ParseError::InvalidMultipart)?;
        let head = std::str::from_utf8(&rest[..head_end]).map_err(|_| ParseError::InvalidMultipart)?;
        let content = &rest[head_end + 4..];

        let mut close = b"\r\n".to_vec();
        close.extend_from_slice(&delimiter);
        let end = find(content, &close).ok_or(ParseError::InvalidMultipart)?;

        if let Some(name) = part_name(head) {
            params
                .entry(name)
                .or_insert_with(|| Bytes::copy_from_slice(&content[..end]));
        }
        rest = &content[end + close.len()..];
    }
}

fn part_name(head: &str) -> Option<String> {
    head.split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Disposition"))
        .and_then(|(_, value)| {
            value.split(';').find_map(|attr| {
                let (key, value) = attr.split_once('=')?;
                (key.trim() == "name").then(|| value.trim().trim_matches('"').to_string())
            })
        })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parameter name for a request header: `X-Forwarded-For` becomes
/// `HTTP_X_FORWARDED_FOR`.
pub fn header_param_name(name: &str) -> String {
    format!("HTTP_{}", name.replace('-', "_").to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_decodes_plus_and_percent_escapes() {
        let params = parse_query(b"json=%7B%22a%22%3A1%7D&time=10&msg=a+b;flag");

        assert_eq!(params["json"], Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(params["time"], Bytes::from_static(b"10"));
        assert_eq!(params["msg"], Bytes::from_static(b"a b"));
        assert_eq!(params["flag"], Bytes::new());
    }

    #[test]
    fn query_keeps_binary_values() {
        let params = parse_query(b"msgpack=%81%A1a%01");

        assert_eq!(&params["msgpack"][..], &[0x81, 0xa1, b'a', 0x01]);
    }

    #[test]
    fn multipart_parts_become_params() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"json\"\r\n\r\n\
{\"a\":1}\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"time\"\r\n\r\n\
42\r\n\
--XyZ--\r\n";

        let boundary = multipart_boundary("multipart/form-data; boundary=\"XyZ\"").unwrap();
        let params = parse_form_data(body, &boundary).unwrap();

        assert_eq!(params["json"], Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(params["time"], Bytes::from_static(b"42"));
    }

    #[test]
    fn header_names_are_upper_snake_case() {
        assert_eq!(header_param_name("x-forwarded-for"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(header_param_name("Host"), "HTTP_HOST");
    }
}
