//! Error types shared by the resolver, the dispatcher and forwarding engines.

use std::io;

use thiserror::Error;

use crate::http::response::StatusCode;

/// Failure to parse a client-supplied host identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("port `{port}` is not an integer in 1..=65535")]
    InvalidPort { port: String },

    #[error("host identifier has no hostname before the port")]
    EmptyHostname,
}

/// Incomplete proxy configuration found while attaching to a server.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    #[error("no {0} target configured")]
    MissingTarget(&'static str),
}

/// Anything that stops a request or upgrade from reaching its upstream.
///
/// Every variant travels through the same error callback, whether it came
/// from target resolution or from the forwarding engine.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid host `{host}`")]
    InvalidHost {
        host: String,
        #[source]
        source: HostError,
    },

    #[error("failed to connect to upstream {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("upstream {stage} timed out")]
    Timeout { stage: &'static str },

    #[error("upstream protocol error: {0}")]
    Protocol(String),

    #[error("upstream refused upgrade with status {status}")]
    UpgradeRejected { status: u16 },

    #[error("protocol `{0}` is not supported by this forwarder")]
    UnsupportedProtocol(String),

    #[error("i/o error while forwarding")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Status code of the generic response sent for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidHost { .. } => StatusCode::BadRequest,
            ProxyError::Timeout { .. } => StatusCode::GatewayTimeout,
            ProxyError::Connect { .. }
            | ProxyError::Protocol(_)
            | ProxyError::UpgradeRejected { .. }
            | ProxyError::UnsupportedProtocol(_)
            | ProxyError::Io(_) => StatusCode::BadGateway,
        }
    }
}
