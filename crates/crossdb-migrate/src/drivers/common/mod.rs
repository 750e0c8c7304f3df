//! Utilities shared by the engine drivers.
//!
//! - [`tls`]: `sslmode` handling and rustls connectors for PostgreSQL
//! - [`introspect`]: catalog row assembly and column translation

pub mod introspect;
pub mod tls;

pub use tls::{SslMode, TlsBuilder};
