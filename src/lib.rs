//! http-ingest - embeddable HTTP event ingestion endpoint
//!
//! Accepts HTTP/1.x requests on a single-threaded reactor, turns each one
//! into a tagged event (or batch of events) and hands it to a [`Router`].
//!
//! ```ignore
//! use http_ingest::{Config, MemoryRouter, Server};
//!
//! let router = MemoryRouter::new();
//! let handle = Server::new(Config::default(), router.clone()).start()?;
//! // POST /app.access?json={"status":200} → router sees tag "app.access"
//! handle.stop()?;
//! ```
//!
//! [`Router`]: ingest::Router

pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod server;

pub use config::Config;
pub use error::IngestError;
pub use ingest::{MemoryRouter, Router, StdoutRouter};
pub use server::{Server, ServerHandle};
