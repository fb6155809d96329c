use http_ingest::http::body::BodyKind;
use http_ingest::http::parser::{ParseError, parse_head};
use http_ingest::http::request::{Method, Version};

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET /tag1?json=%7B%7D HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse_head(req).unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.target, "/tag1?json=%7B%7D");
    assert_eq!(parsed.version, Version::Http11);
    assert_eq!(parsed.header("Host"), Some("example.com"));
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_post_leaves_body() {
    let req = b"POST /a/b HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
    let (parsed, consumed) = parse_head(req).unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.content_length().unwrap(), Some(7));
    assert_eq!(parsed.body_kind().unwrap(), BodyKind::Fixed(7));
    assert_eq!(&req[consumed..], b"{\"a\":1}");
}

#[test]
fn test_headers_keep_wire_order_and_case() {
    let req = b"GET / HTTP/1.1\r\nX-First: 1\r\nx-second: 2\r\nX-First: 3\r\n\r\n";
    let (parsed, _) = parse_head(req).unwrap();

    let names: Vec<&str> = parsed.headers.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, vec!["X-First", "x-second", "X-First"]);
    assert_eq!(parsed.header("x-first"), Some("1"));
    assert_eq!(parsed.header("X-SECOND"), Some("2"));
}

#[test]
fn test_header_values_are_trimmed() {
    let req = b"GET / HTTP/1.1\r\nOrigin:   http://foo.example  \r\n\r\n";
    let (parsed, _) = parse_head(req).unwrap();

    assert_eq!(parsed.header("Origin"), Some("http://foo.example"));
}

#[test]
fn test_incomplete_head() {
    let req = b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n";
    assert_eq!(parse_head(req).unwrap_err(), ParseError::Incomplete);
}

#[test]
fn test_invalid_method() {
    let req = b"BREW /pot HTTP/1.1\r\n\r\n";
    assert_eq!(parse_head(req).unwrap_err(), ParseError::InvalidMethod);
}

#[test]
fn test_invalid_version() {
    let req = b"GET / HTTP/2.0\r\n\r\n";
    assert_eq!(parse_head(req).unwrap_err(), ParseError::InvalidVersion);
}

#[test]
fn test_malformed_request_line() {
    let req = b"GET\r\n\r\n";
    assert_eq!(parse_head(req).unwrap_err(), ParseError::InvalidRequest);
}

#[test]
fn test_header_without_colon() {
    let req = b"GET / HTTP/1.1\r\nBroken header\r\n\r\n";
    assert_eq!(parse_head(req).unwrap_err(), ParseError::InvalidHeader);
}

#[test]
fn test_chunked_wins_over_content_length() {
    let req = b"POST / HTTP/1.1\r\nContent-Length: 10\r\nTransfer-Encoding: chunked\r\n\r\n";
    let (parsed, _) = parse_head(req).unwrap();

    assert!(parsed.is_chunked());
    assert_eq!(parsed.body_kind().unwrap(), BodyKind::Chunked);
}

#[test]
fn test_bad_content_length() {
    let req = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
    let (parsed, _) = parse_head(req).unwrap();

    assert_eq!(parsed.content_length(), Err(ParseError::InvalidContentLength));
}
