//! HTTP/1.x protocol layer.
//!
//! A hand-written, incremental HTTP/1.0 and 1.1 server side, just large
//! enough for event ingestion: any path, parameters in the query string
//! and/or body, keep-alive, `Expect: 100-continue`, CORS preflight.
//!
//! # Architecture
//!
//! - **`connection`**: the per-connection state machine ([`connection::ConnectionHandler`])
//!   and the task driving it over a socket ([`connection::Connection`])
//! - **`parser`**: parses request heads from byte buffers
//! - **`body`**: `Content-Length` and chunked body framing
//! - **`params`**: query string, form and multipart parameter extraction
//! - **`request`**: request head representation
//! - **`response`**: response representation with builder pattern
//! - **`writer`**: serializes responses onto the output buffer
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Nothing buffered yet
//!        └──────┬───────────┘
//!               │ First bytes
//!               ▼
//!        ┌──────────────────┐
//!        │ ReceivingHeaders │ ← Buffer until the blank line
//!        └──────┬───────────┘   (100 Continue / 417 / OPTIONS answered here)
//!               │ Head parsed
//!               ▼
//!        ┌──────────────────┐
//!        │  ReceivingBody   │ ← Bounded by body_size_limit (413)
//!        └──────┬───────────┘
//!               │ Message complete → CORS check → dispatch → respond
//!               ├─ Keep-Alive → AwaitingRequest (same connection)
//!               └─ Close → Closed
//! ```

pub mod body;
pub mod connection;
pub mod params;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
