//! Upstream connection and request forwarding
//!
//! [`HttpForwarder`] is the bundled [`Forwarder`]: plain HTTP/1.1 over TCP,
//! one upstream connection per request, and raw byte relaying for upgrades.

use crate::error::ProxyError;
use crate::http::parser::MAX_HEADER_BYTES;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::callback::{WebCallback, WsCallback};
use crate::proxy::target::{Protocol, TargetConfig};
use crate::proxy::Forwarder;
use crate::server::{Responder, Socket};
use crate::transport;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Headers that only describe the client hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Proxy-Authorization",
    "TE",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

/// Forwards requests and upgrades to upstream servers over plain TCP.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    /// Connection timeout duration
    connection_timeout: Duration,

    /// Request timeout duration
    request_timeout: Duration,
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }
}

impl HttpForwarder {
    /// Timeouts apply unless the target sets its own.
    pub fn new(connection_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            request_timeout,
        }
    }

    /// Forward one request and return the upstream response.
    pub async fn forward_request(
        &self,
        request: &Request,
        target: &TargetConfig,
    ) -> Result<Response, ProxyError> {
        let mut stream = self.connect(target).await?;

        let request_bytes = self.build_http_request(request, target);

        timeout(self.request_timeout(target), async {
            stream.write_all(&request_bytes).await?;
            stream.flush().await?;

            tracing::trace!(upstream = %target.socket_addr(), "Request sent to upstream");

            self.read_http_response(&mut stream, request.method == Method::HEAD)
                .await
        })
        .await
        .map_err(|_| ProxyError::Timeout { stage: "response" })?
    }

    /// Connect to the target, honouring its own connect timeout if set.
    async fn connect(&self, target: &TargetConfig) -> Result<TcpStream, ProxyError> {
        if target.protocol == Protocol::Https {
            return Err(ProxyError::UnsupportedProtocol(
                target.protocol.as_str().to_string(),
            ));
        }

        let addr = target.socket_addr();
        let connect_timeout = target
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.connection_timeout);

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::Timeout { stage: "connect" })?
            .map_err(|source| ProxyError::Connect {
                addr: addr.clone(),
                source,
            })?;

        tracing::trace!(upstream = %addr, "Connected to upstream");
        Ok(stream)
    }

    fn request_timeout(&self, target: &TargetConfig) -> Duration {
        target
            .proxy_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.request_timeout)
    }

    /// Headers sent upstream for `request`.
    ///
    /// The client's `Host` is preserved; without one the target's host is
    /// used. Hop-by-hop headers are dropped and the target's own headers win.
    fn forwarded_headers(&self, request: &Request, target: &TargetConfig) -> HashMap<String, String> {
        let mut headers: HashMap<String, String> = request
            .headers
            .iter()
            .filter(|(k, _)| !k.starts_with(':'))
            .filter(|(k, _)| {
                !HOP_BY_HOP.iter().any(|h| k.eq_ignore_ascii_case(h))
                    && !k.eq_ignore_ascii_case("Host")
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let host = match request.authority() {
            Some(authority) => {
                headers.insert("X-Forwarded-Host".to_string(), authority.to_string());
                authority.to_string()
            }
            None => target.host_header(),
        };
        headers.insert("Host".to_string(), host);

        if let Some(name) = &target.proxy_name {
            let via = match request.header("Via") {
                Some(prev) => format!("{prev}, 1.1 {name}"),
                None => format!("1.1 {name}"),
            };
            headers.retain(|k, _| !k.eq_ignore_ascii_case("Via"));
            headers.insert("Via".to_string(), via);
        }

        for (key, value) in &target.headers {
            headers.retain(|k, _| !k.eq_ignore_ascii_case(key));
            headers.insert(key.clone(), value.clone());
        }

        headers
    }

    fn write_head(
        buffer: &mut Vec<u8>,
        request: &Request,
        target: &TargetConfig,
        headers: &HashMap<String, String>,
    ) {
        let path = target.request_path(&request.path);
        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", request.method.as_str(), path).as_bytes(),
        );
        for (key, value) in headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        buffer.extend_from_slice(b"\r\n");
    }

    /// Build HTTP request bytes to send to the upstream
    ///
    /// Note: This method is made public for integration testing purposes
    pub fn build_http_request(&self, request: &Request, target: &TargetConfig) -> Vec<u8> {
        let mut headers = self.forwarded_headers(request, target);
        headers.retain(|k, _| !k.eq_ignore_ascii_case("Content-Length"));

        // One request per upstream connection
        headers.insert("Connection".to_string(), "close".to_string());

        // A chunked client body arrives decoded and is re-framed by length
        let framed = request.header("Content-Length").is_some()
            || request.header("Transfer-Encoding").is_some();
        if !request.body.is_empty() || framed {
            headers.insert("Content-Length".to_string(), request.body.len().to_string());
        }

        let mut buffer = Vec::new();
        Self::write_head(&mut buffer, request, target, &headers);
        buffer.extend_from_slice(&request.body);
        buffer
    }

    /// Build the upgrade request head, keeping the protocol switch headers.
    pub fn build_upgrade_request(&self, request: &Request, target: &TargetConfig) -> Vec<u8> {
        let mut headers = self.forwarded_headers(request, target);
        if let Some(upgrade) = request.header("Upgrade") {
            headers.insert("Upgrade".to_string(), upgrade.to_string());
        }
        headers.insert("Connection".to_string(), "Upgrade".to_string());

        let mut buffer = Vec::new();
        Self::write_head(&mut buffer, request, target, &headers);
        buffer
    }

    /// Reads until the end of the response header section.
    ///
    /// Returns the length of the header section including the blank line.
    async fn read_head(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<usize, ProxyError> {
        loop {
            if let Some(end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
                return Ok(end + 4);
            }

            // Prevent unbounded header growth
            if buffer.len() > MAX_HEADER_BYTES {
                return Err(ProxyError::Protocol("response headers too large".into()));
            }

            let n = stream.read_buf(buffer).await?;
            if n == 0 {
                return Err(ProxyError::Protocol(
                    "connection closed before complete response head".into(),
                ));
            }
        }
    }

    async fn read_http_response(
        &self,
        stream: &mut TcpStream,
        head_only: bool,
    ) -> Result<Response, ProxyError> {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let head_len = Self::read_head(stream, &mut buffer).await?;

        let headers_bytes = buffer.split_to(head_len);
        let (status, mut headers) = parse_response_headers(&headers_bytes)?;

        let bodyless = head_only
            || matches!(status.as_u16(), 100..=199 | 204 | 304);
        let body = if bodyless {
            Vec::new()
        } else {
            read_response_body(stream, &mut buffer, &headers).await?
        };

        headers.retain(|(k, _)| {
            !k.eq_ignore_ascii_case("Connection") && !k.eq_ignore_ascii_case("Keep-Alive")
        });

        Ok(ResponseBuilder::new(status).headers(headers).body(body).build())
    }

    /// Relay an upgrade: handshake with the upstream, then pipe both ways.
    async fn forward_upgrade(
        &self,
        request: &Request,
        socket: &mut Socket,
        head: &[u8],
        target: &TargetConfig,
    ) -> Result<(), ProxyError> {
        let mut upstream = self.connect(target).await?;

        let request_bytes = self.build_upgrade_request(request, target);
        upstream.write_all(&request_bytes).await?;
        if !head.is_empty() {
            upstream.write_all(head).await?;
        }

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let head_len = timeout(
            self.request_timeout(target),
            Self::read_head(&mut upstream, &mut buffer),
        )
        .await
        .map_err(|_| ProxyError::Timeout { stage: "upgrade" })??;

        let (status, _) = parse_response_headers(&buffer[..head_len])?;
        if status != StatusCode::SwitchingProtocols {
            return Err(ProxyError::UpgradeRejected {
                status: status.as_u16(),
            });
        }

        // Reply head plus any frames the upstream already sent
        socket.write_all(&buffer).await?;
        socket.flush().await?;

        match tokio::io::copy_bidirectional(socket, &mut upstream).await {
            Ok((to_upstream, to_client)) => {
                tracing::debug!(
                    path = %request.path,
                    to_upstream,
                    to_client,
                    "Upgraded connection closed"
                );
                Ok(())
            }
            Err(e) => transport::absorb_benign(e).map_err(ProxyError::Io),
        }
    }
}

/// Parse the status line and headers of an upstream response
///
/// Repeated header lines are kept as separate pairs.
fn parse_response_headers(
    headers_bytes: &[u8],
) -> Result<(StatusCode, Vec<(String, String)>), ProxyError> {
    let headers_str = std::str::from_utf8(headers_bytes)
        .map_err(|_| ProxyError::Protocol("invalid UTF-8 in response headers".into()))?;

    let mut lines = headers_str.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| ProxyError::Protocol("empty response".into()))?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

    if parts.len() < 2 || !parts[0].starts_with("HTTP/") {
        return Err(ProxyError::Protocol(format!(
            "invalid status line: {}",
            status_line
        )));
    }

    let status_code: u16 = parts[1]
        .parse()
        .map_err(|_| ProxyError::Protocol(format!("invalid status code: {}", parts[1])))?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok((StatusCode::from_u16(status_code), headers))
}

/// Read response body based on Content-Length, or until the upstream closes
async fn read_response_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    headers: &[(String, String)],
) -> Result<Vec<u8>, ProxyError> {
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| {
            v.parse::<usize>()
                .map_err(|_| ProxyError::Protocol(format!("invalid Content-Length: {}", v)))
        })
        .transpose()?;

    let Some(content_length) = content_length else {
        let mut body = buffer.split().to_vec();
        loop {
            let n = stream.read_buf(buffer).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buffer.split());
        }
        return Ok(body);
    };

    let mut body = Vec::with_capacity(content_length);

    // Use existing buffer data first
    let from_buffer = buffer.len().min(content_length);
    body.extend_from_slice(&buffer[..from_buffer]);
    buffer.advance(from_buffer);

    let mut chunk = [0u8; BUFFER_SIZE];
    while body.len() < content_length {
        let to_read = (content_length - body.len()).min(BUFFER_SIZE);
        let n = stream.read(&mut chunk[..to_read]).await?;

        if n == 0 {
            return Err(ProxyError::Protocol(
                "connection closed before complete body received".into(),
            ));
        }

        body.extend_from_slice(&chunk[..n]);
    }

    Ok(body)
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn web(
        &self,
        request: Request,
        response: Responder,
        target: &TargetConfig,
        on_error: &dyn WebCallback,
    ) {
        match self.forward_request(&request, target).await {
            Ok(upstream_response) => {
                tracing::info!(
                    upstream = %target.socket_addr(),
                    status = upstream_response.status.as_u16(),
                    method = ?request.method,
                    path = %request.path,
                    "Request forwarded successfully"
                );
                if !response.send(upstream_response) {
                    tracing::debug!(path = %request.path, "Client gone before response");
                }
            }
            Err(e) => on_error.on_error(e, &request, response),
        }
    }

    async fn ws(
        &self,
        request: Request,
        mut socket: Socket,
        head: Bytes,
        target: &TargetConfig,
        on_error: &dyn WsCallback,
    ) {
        if let Err(e) = self.forward_upgrade(&request, &mut socket, &head, target).await {
            on_error.on_error(e, &request, socket, head);
        }
    }
}
