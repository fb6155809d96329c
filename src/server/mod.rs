//! Event loop, listener and keepalive management.

pub mod keepalive;
pub mod listener;

pub use keepalive::{ConnectionId, KeepaliveManager};
pub use listener::{Server, ServerHandle};
