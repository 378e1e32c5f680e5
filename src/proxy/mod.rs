//! Reverse proxy functionality
//!
//! This module decides where each request or upgrade is forwarded and hands
//! it to a [`Forwarder`]. The forwarder does the network work; the dispatcher
//! only resolves targets and routes failures to the error callbacks.

pub mod callback;
pub mod dispatch;
pub mod host;
pub mod target;
pub mod upstream;

use async_trait::async_trait;
use bytes::Bytes;

use crate::http::request::Request;
use crate::server::{Responder, Socket};

pub use callback::{DefaultWebCallback, DefaultWsCallback, WebCallback, WsCallback};
pub use dispatch::{Dispatcher, ProxyBuilder};
pub use host::{ParsedHost, parse_host, resolve_target};
pub use target::{Protocol, TargetConfig, TlsOptions};
pub use upstream::HttpForwarder;

/// The engine that performs the actual upstream call.
///
/// Neither method returns an error: failures are reported only by invoking
/// `on_error`, which receives ownership of the response handle or socket.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forwards a single request and answers through `response`.
    async fn web(
        &self,
        request: Request,
        response: Responder,
        target: &TargetConfig,
        on_error: &dyn WebCallback,
    );

    /// Forwards an upgraded connection and relays bytes until either side closes.
    async fn ws(
        &self,
        request: Request,
        socket: Socket,
        head: Bytes,
        target: &TargetConfig,
        on_error: &dyn WsCallback,
    );
}
