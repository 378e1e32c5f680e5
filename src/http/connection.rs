use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::server::{EventListener, Io, Responder, ServerEvent};

pub struct Connection<S> {
    stream: S,
    buffer: Vec<u8>,
    state: ConnectionState,
    listener: Option<Arc<dyn EventListener>>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Upgrading(Request),
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl<S: Io + 'static> Connection<S> {
    pub fn new(stream: S, listener: Option<Arc<dyn EventListener>>) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            listener,
        }
    }

    /// Drives the connection until it closes or is handed off by an upgrade.
    ///
    /// Only transport errors are returned; malformed requests are answered
    /// with `400` and close the connection.
    pub async fn run(mut self) -> std::io::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) if req.is_upgrade() => {
                            ConnectionState::Upgrading(req)
                        }
                        ReadOutcome::Request(req) => ConnectionState::Processing(req),
                        ReadOutcome::Malformed(e) => {
                            tracing::debug!(error = ?e, "Malformed request");
                            let response = Response::error(StatusCode::BadRequest);
                            ConnectionState::Writing(ResponseWriter::new(&response), false)
                        }
                        ReadOutcome::Eof => ConnectionState::Closed,
                    };
                }

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let response = self.handle_request(req).await;
                    let keep_alive = keep_alive && !closes_connection(&response);

                    let writer = ResponseWriter::new(&response);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading;
                    }
                }

                ConnectionState::Upgrading(req) => {
                    return self.upgrade(req).await;
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> std::io::Result<ReadOutcome> {
        loop {
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            let mut temp = [0u8; 1024];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    async fn handle_request(&mut self, request: Request) -> Response {
        let Some(listener) = &self.listener else {
            return Response::not_found();
        };

        let (response, rx) = Responder::channel();
        listener
            .on_event(ServerEvent::Request { request, response })
            .await;

        rx.await.unwrap_or_else(|_| Response::internal_error())
    }

    async fn upgrade(mut self, request: Request) -> std::io::Result<()> {
        let Some(listener) = self.listener.take() else {
            let mut writer = ResponseWriter::new(&Response::not_found());
            return writer.write_to_stream(&mut self.stream).await;
        };

        let head = Bytes::from(std::mem::take(&mut self.buffer));
        listener
            .on_event(ServerEvent::Upgrade {
                request,
                socket: Box::new(self.stream),
                head,
            })
            .await;

        Ok(())
    }
}

fn closes_connection(response: &Response) -> bool {
    response
        .header_values("Connection")
        .any(|v| v.eq_ignore_ascii_case("close"))
}
