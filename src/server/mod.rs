//! The server the proxy attaches to.
//!
//! [`Server`] accepts TCP connections and drives each one through the HTTP/1.1
//! state machine in [`crate::http::connection`]. Everything the connection
//! cannot answer itself is surfaced to a single subscriber as a
//! [`ServerEvent`]. The subscriber owns the handles carried by the event: it
//! answers a request through its [`Responder`] and takes over the raw socket of
//! an upgrade.

pub mod listener;

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::http::request::Request;
use crate::http::response::Response;

pub use listener::Server;

/// A byte stream the server can hand over on upgrade.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Raw client connection detached from the HTTP state machine.
pub type Socket = Box<dyn Io>;

/// Events a subscriber receives from the server.
pub enum ServerEvent {
    /// A complete request that expects exactly one response.
    Request {
        request: Request,
        response: Responder,
    },
    /// A request asking to switch protocols.
    ///
    /// `head` holds the bytes the server had already read past the request
    /// header section. After this event the server no longer touches the socket.
    Upgrade {
        request: Request,
        socket: Socket,
        head: Bytes,
    },
}

impl std::fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerEvent::Request { request, .. } => f
                .debug_struct("Request")
                .field("method", &request.method)
                .field("path", &request.path)
                .finish(),
            ServerEvent::Upgrade { request, head, .. } => f
                .debug_struct("Upgrade")
                .field("path", &request.path)
                .field("head_len", &head.len())
                .finish(),
        }
    }
}

/// Subscriber interface of [`Server`].
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handles one event. Events from one connection arrive in order.
    async fn on_event(&self, event: ServerEvent);

    /// Decides what happens to an I/O error on an established connection.
    ///
    /// `Ok(())` absorbs the error and closes only that connection. An `Err`
    /// is fatal: the accept loop stops and [`Server::run`] returns it.
    fn on_transport_error(&self, error: io::Error) -> io::Result<()> {
        Err(error)
    }
}

/// One-shot handle used to answer a [`ServerEvent::Request`].
///
/// Dropping it without sending makes the server answer `500`.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Response>,
}

impl Responder {
    /// Creates a responder and the receiver the connection waits on.
    pub fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Sends the response. Returns `false` if the client connection is gone.
    pub fn send(self, response: Response) -> bool {
        self.tx.send(response).is_ok()
    }
}
