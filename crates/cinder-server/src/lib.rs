//! cinder-server: the TCP front end.
//!
//! Wires a [`cinder_core::Engine`] to client connections: clap-driven
//! configuration, per-connection sessions with drained close, and
//! graceful shutdown on the usual signals.

pub mod config;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use server::Handler;
pub use session::ClientSession;
