use bytes::Bytes;

use crate::error::IngestError;

/// 1x1 transparent GIF returned to pixel-tracking beacons.
pub const EMPTY_GIF_IMAGE: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\xff\x00\xff\xff\xff\x00\x00\x00,\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02D\x01\x00;";

/// HTTP status codes used by the ingestion endpoint.
///
/// - `Continue` (100): interim answer to `Expect: 100-continue`
/// - `Ok` (200): event accepted, or nothing to accept
/// - `BadRequest` (400): parameters could not be decoded
/// - `Forbidden` (403): origin not in the CORS allow-list
/// - `PayloadTooLarge` (413): body exceeds the configured limit
/// - `ExpectationFailed` (417): unsupported `Expect` value
/// - `InternalServerError` (500): the router rejected the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 413 Request Entity Too Large
    PayloadTooLarge,
    /// 417 Expectation Failed
    ExpectationFailed,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use http_ingest::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::ExpectationFailed => 417,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the reason phrase sent on the status line.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::PayloadTooLarge => "Request Entity Too Large",
            StatusCode::ExpectationFailed => "Expectation Failed",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

/// A complete HTTP response ready to be serialized.
///
/// Headers keep insertion order; lookups ignore case.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Response body as bytes
    pub body: Bytes,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "image/gif; charset=utf-8")
///     .body(Bytes::from_static(EMPTY_GIF_IMAGE))
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Empty `200 OK` with a plain-text content type.
    pub fn ok() -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .build()
    }

    /// `200 OK` carrying the tracking pixel.
    pub fn pixel() -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "image/gif; charset=utf-8")
            .body(Bytes::from_static(EMPTY_GIF_IMAGE))
            .build()
    }

    /// Status line only, used for `100 Continue`.
    pub fn interim(status: StatusCode) -> Self {
        ResponseBuilder::new(status).build()
    }

    /// Maps a request-level error to its response.
    pub fn from_error(err: &IngestError) -> Self {
        let status = err.status();
        match err {
            IngestError::BadRequest(msg) | IngestError::DownstreamFailure(msg) => {
                ResponseBuilder::new(status)
                    .header("Content-Type", "text/plain")
                    .body(format!(
                        "{} {}\n{}\n",
                        status.as_u16(),
                        status.reason_phrase(),
                        msg
                    ))
                    .build()
            }
            IngestError::PayloadTooLarge => ResponseBuilder::new(status).body("Too large").build(),
            IngestError::ExpectationFailed(_) => ResponseBuilder::new(status).build(),
            IngestError::Forbidden(_) => ResponseBuilder::new(status)
                .header("Connection", "close")
                .build(),
        }
    }

    /// Retrieves a header value, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Replaces any header with the same name (ignoring case).
    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.retain(|(name, _)| !name.eq_ignore_ascii_case(key));
        self.headers.push((key.to_string(), value.into()));
    }

    /// Adds a header only if none with that name is present.
    pub fn default_header(&mut self, key: &str, value: impl Into<String>) {
        if self.header(key).is_none() {
            self.headers.push((key.to_string(), value.into()));
        }
    }

    /// Fills in the headers every final response carries.
    ///
    /// `cors_method` and `cors_headers` are the request's
    /// `Access-Control-Request-*` values, echoed back when present.
    pub fn apply_defaults(&mut self, cors_method: Option<&str>, cors_headers: Option<&str>) {
        let length = self.body.len();
        self.default_header("Content-Length", length.to_string());
        self.default_header("Content-Type", "text/plain");
        self.default_header("Access-Control-Allow-Origin", "*");
        if let Some(method) = cors_method {
            self.default_header("Access-Control-Allow-Methods", method);
        }
        if let Some(headers) = cors_headers {
            self.default_header("Access-Control-Allow-Headers", headers);
        }
    }
}
