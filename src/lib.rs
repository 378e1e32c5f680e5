//! Sentinel Bypass - reverse proxy attachment
//!
//! Attaches reverse-proxy behavior to a [`server::Server`]: every request and
//! protocol upgrade is forwarded to a configured upstream, optionally with the
//! hostname the client addressed.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;
pub mod transport;
