//! Request-level errors.
//!
//! None of these stop the event loop: each becomes an HTTP response, and the
//! variant decides whether the connection survives it.

use thiserror::Error;

use crate::http::response::StatusCode;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or undecodable parameters, or a bad timestamp.
    #[error("{0}")]
    BadRequest(String),

    /// The body grew past `body_size_limit`.
    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    /// An `Expect` value other than `100-continue`.
    #[error("unsupported expectation: {0}")]
    ExpectationFailed(String),

    /// The request `Origin` is not in the CORS allow-list.
    #[error("origin not allowed: {}", .0.as_deref().unwrap_or("<none>"))]
    Forbidden(Option<String>),

    /// The router refused the event(s).
    #[error("{0}")]
    DownstreamFailure(String),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::BadRequest(_) => StatusCode::BadRequest,
            IngestError::PayloadTooLarge => StatusCode::PayloadTooLarge,
            IngestError::ExpectationFailed(_) => StatusCode::ExpectationFailed,
            IngestError::Forbidden(_) => StatusCode::Forbidden,
            IngestError::DownstreamFailure(_) => StatusCode::InternalServerError,
        }
    }

    /// Whether the connection must be closed after answering.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            IngestError::PayloadTooLarge
                | IngestError::ExpectationFailed(_)
                | IngestError::Forbidden(_)
        )
    }
}
