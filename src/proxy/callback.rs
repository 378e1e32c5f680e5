//! Error callbacks
//!
//! Resolution failures and forwarding failures end up in the same callback.
//! Callers can replace either default with their own implementation or a
//! closure.

use bytes::Bytes;

use crate::error::ProxyError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::server::{Responder, Socket};

/// Failure continuation for plain requests.
pub trait WebCallback: Send + Sync {
    fn on_error(&self, error: ProxyError, request: &Request, response: Responder);
}

/// Failure continuation for upgraded connections.
pub trait WsCallback: Send + Sync {
    fn on_error(&self, error: ProxyError, request: &Request, socket: Socket, head: Bytes);
}

impl<F> WebCallback for F
where
    F: Fn(ProxyError, &Request, Responder) + Send + Sync,
{
    fn on_error(&self, error: ProxyError, request: &Request, response: Responder) {
        self(error, request, response)
    }
}

impl<F> WsCallback for F
where
    F: Fn(ProxyError, &Request, Socket, Bytes) + Send + Sync,
{
    fn on_error(&self, error: ProxyError, request: &Request, socket: Socket, head: Bytes) {
        self(error, request, socket, head)
    }
}

/// Logs the error and answers with a generic error response.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWebCallback;

impl WebCallback for DefaultWebCallback {
    fn on_error(&self, error: ProxyError, request: &Request, response: Responder) {
        tracing::error!(
            error = %error,
            cause = ?std::error::Error::source(&error),
            method = ?request.method,
            path = %request.path,
            "proxy error"
        );

        if !response.send(Response::error(error.status_code())) {
            tracing::debug!(path = %request.path, "Client gone before error response");
        }
    }
}

/// Logs the error and destroys the socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWsCallback;

impl WsCallback for DefaultWsCallback {
    fn on_error(&self, error: ProxyError, request: &Request, socket: Socket, _head: Bytes) {
        tracing::error!(
            error = %error,
            cause = ?std::error::Error::source(&error),
            path = %request.path,
            "proxy error"
        );

        drop(socket);
    }
}
