use url::Url;

use crate::http::body::BodyKind;
use crate::http::parser::ParseError;

/// HTTP request methods.
///
/// Every method is accepted on any path; only `OPTIONS` is treated specially
/// (answered as a CORS preflight without reaching the dispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Parameters travel in the query string
    GET,
    /// POST - Parameters travel in the query string and/or the body
    POST,
    /// PUT - Treated like POST
    PUT,
    /// DELETE - Treated like GET
    DELETE,
    /// HEAD - Treated like GET
    HEAD,
    /// OPTIONS - CORS preflight
    OPTIONS,
    /// PATCH - Treated like POST
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Example
    ///
    /// ```
    /// # use http_ingest::http::request::Method;
    /// assert_eq!(Method::from_str("OPTIONS"), Some(Method::OPTIONS));
    /// assert_eq!(Method::from_str("options"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

/// Protocol version from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }
}

/// The request line and headers of one HTTP message.
///
/// Bodies are not part of the head; they are framed separately by
/// [`BodyKind`] and accumulated by the connection handler.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The raw request target (e.g. "/a/b?time=1")
    pub target: String,
    /// HTTP version
    pub version: Version,
    /// Request headers in wire order, names as sent
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Retrieves the first header value with the given name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Parses the declared Content-Length, if any.
    pub fn content_length(&self) -> Result<Option<usize>, ParseError> {
        self.header("Content-Length")
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength)
            })
            .transpose()
    }

    /// Whether the body uses chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .map(|v| {
                v.rsplit(',')
                    .next()
                    .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false)
    }

    /// How the body of this message is framed.
    ///
    /// Chunked coding wins over Content-Length; a message with neither has
    /// no body.
    pub fn body_kind(&self) -> Result<BodyKind, ParseError> {
        if self.is_chunked() {
            return Ok(BodyKind::Chunked);
        }
        Ok(BodyKind::Fixed(self.content_length()?.unwrap_or(0)))
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close. A `Connection`
    /// header mentioning `close` or `keep-alive` (any case) overrides that.
    pub fn keep_alive(&self) -> bool {
        let mut keep_alive = self.version == Version::Http11;
        for (name, value) in &self.headers {
            if !name.eq_ignore_ascii_case("Connection") {
                continue;
            }
            let value = value.to_ascii_lowercase();
            if value.contains("close") {
                keep_alive = false;
            } else if value.contains("keep-alive") {
                keep_alive = true;
            }
        }
        keep_alive
    }

    /// Splits the request target into a percent-encoded path and raw query.
    ///
    /// Both origin-form (`/a/b?x=1`) and absolute-form
    /// (`http://host/a/b?x=1`) targets are accepted.
    pub fn path_and_query(&self) -> Result<(String, Option<String>), ParseError> {
        let base = Url::parse("http://localhost/").map_err(|_| ParseError::InvalidRequest)?;
        let url = base
            .join(&self.target)
            .map_err(|_| ParseError::InvalidRequest)?;
        Ok((url.path().to_string(), url.query().map(str::to_owned)))
    }
}
