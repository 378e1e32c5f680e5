use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use crate::http::connection::Connection;
use crate::server::EventListener;

/// Accept loop that turns connections into [`crate::server::ServerEvent`]s.
pub struct Server {
    listener: TcpListener,
    handler: Option<Arc<dyn EventListener>>,
}

impl Server {
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::from_listener(listener))
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            handler: None,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers the subscriber for all future events, replacing any previous one.
    pub fn subscribe(&mut self, handler: Arc<dyn EventListener>) {
        self.handler = Some(handler);
    }

    /// Accepts connections until the listener fails or a connection raises a
    /// transport error its subscriber treats as fatal.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Listening on {}", self.local_addr()?);

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<(SocketAddr, io::Error)>();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = accepted.context("accept failed")?;
                    info!("Accepted connection from {}", peer);

                    let handler = self.handler.clone();
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        let conn = Connection::new(socket, handler.clone());
                        let Err(e) = conn.run().await else {
                            return;
                        };
                        match handler {
                            Some(handler) => {
                                if let Err(fatal) = handler.on_transport_error(e) {
                                    let _ = fatal_tx.send((peer, fatal));
                                }
                            }
                            None => tracing::error!("Connection error from {}: {}", peer, e),
                        }
                    });
                }

                Some((peer, e)) = fatal_rx.recv() => {
                    tracing::error!(peer = %peer, error = %e, "Fatal transport error");
                    return Err(anyhow::Error::new(e)
                        .context(format!("fatal transport error on connection from {peer}")));
                }
            }
        }
    }
}
