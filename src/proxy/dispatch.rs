//! Event dispatch
//!
//! The [`Dispatcher`] subscribes to a [`Server`] and turns each request and
//! upgrade event into one [`Forwarder`] call against the resolved target.

use std::borrow::Cow;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ProxyError, SetupError};
use crate::http::request::Request;
use crate::proxy::callback::{DefaultWebCallback, DefaultWsCallback, WebCallback, WsCallback};
use crate::proxy::host::resolve_target;
use crate::proxy::target::TargetConfig;
use crate::proxy::Forwarder;
use crate::server::{EventListener, Responder, Server, ServerEvent, Socket};
use crate::transport;

/// Routes server events to the forwarding engine.
pub struct Dispatcher {
    forwarder: Arc<dyn Forwarder>,
    web_target: Arc<TargetConfig>,
    ws_target: Arc<TargetConfig>,
    web_callback: Arc<dyn WebCallback>,
    ws_callback: Arc<dyn WsCallback>,
    bypass_host: bool,
}

impl Dispatcher {
    /// Target for `request`, starting from `base`.
    ///
    /// With host override disabled this is always `base`.
    pub fn effective_target<'a>(
        &self,
        request: &Request,
        base: &'a TargetConfig,
    ) -> Result<Cow<'a, TargetConfig>, ProxyError> {
        if !self.bypass_host {
            return Ok(Cow::Borrowed(base));
        }
        resolve_target(request.authority(), base)
    }

    pub async fn dispatch_request(&self, request: Request, response: Responder) {
        let target = match self.effective_target(&request, &self.web_target) {
            Ok(target) => target,
            Err(e) => {
                self.web_callback.on_error(e, &request, response);
                return;
            }
        };

        tracing::debug!(
            method = ?request.method,
            path = %request.path,
            upstream = %target.socket_addr(),
            "Forwarding request"
        );

        self.forwarder
            .web(request, response, &target, self.web_callback.as_ref())
            .await;
    }

    pub async fn dispatch_upgrade(&self, request: Request, socket: Socket, head: Bytes) {
        let target = match self.effective_target(&request, &self.ws_target) {
            Ok(target) => target,
            Err(e) => {
                self.ws_callback.on_error(e, &request, socket, head);
                return;
            }
        };

        tracing::debug!(
            path = %request.path,
            upstream = %target.socket_addr(),
            head_len = head.len(),
            "Forwarding upgrade"
        );

        self.forwarder
            .ws(request, socket, head, &target, self.ws_callback.as_ref())
            .await;
    }
}

#[async_trait]
impl EventListener for Dispatcher {
    async fn on_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Request { request, response } => {
                self.dispatch_request(request, response).await
            }
            ServerEvent::Upgrade {
                request,
                socket,
                head,
            } => self.dispatch_upgrade(request, socket, head).await,
        }
    }

    fn on_transport_error(&self, error: io::Error) -> io::Result<()> {
        transport::absorb_benign(error)
    }
}

/// Builder for a [`Dispatcher`].
///
/// # Example
///
/// ```ignore
/// let mut server = Server::bind("127.0.0.1:8080").await?;
/// ProxyBuilder::new(Arc::new(HttpForwarder::default()))
///     .web_target(TargetConfig::from_url("http://127.0.0.1:3000")?)
///     .ws_target(TargetConfig::from_url("http://127.0.0.1:3001")?)
///     .bypass_host(true)
///     .attach(&mut server)?;
/// server.run().await?;
/// ```
pub struct ProxyBuilder {
    forwarder: Arc<dyn Forwarder>,
    web_target: Option<TargetConfig>,
    ws_target: Option<TargetConfig>,
    web_callback: Option<Arc<dyn WebCallback>>,
    ws_callback: Option<Arc<dyn WsCallback>>,
    bypass_host: bool,
}

impl ProxyBuilder {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            forwarder,
            web_target: None,
            ws_target: None,
            web_callback: None,
            ws_callback: None,
            bypass_host: false,
        }
    }

    pub fn web_target(mut self, target: TargetConfig) -> Self {
        self.web_target = Some(target);
        self
    }

    pub fn ws_target(mut self, target: TargetConfig) -> Self {
        self.ws_target = Some(target);
        self
    }

    pub fn web_callback(mut self, callback: impl WebCallback + 'static) -> Self {
        self.web_callback = Some(Arc::new(callback));
        self
    }

    pub fn ws_callback(mut self, callback: impl WsCallback + 'static) -> Self {
        self.ws_callback = Some(Arc::new(callback));
        self
    }

    /// Replace the target hostname with the one the client addressed.
    pub fn bypass_host(mut self, enabled: bool) -> Self {
        self.bypass_host = enabled;
        self
    }

    pub fn build(self) -> Result<Dispatcher, SetupError> {
        let web_target = self.web_target.ok_or(SetupError::MissingTarget("web"))?;
        let ws_target = self.ws_target.ok_or(SetupError::MissingTarget("ws"))?;

        Ok(Dispatcher {
            forwarder: self.forwarder,
            web_target: Arc::new(web_target),
            ws_target: Arc::new(ws_target),
            web_callback: self
                .web_callback
                .unwrap_or_else(|| Arc::new(DefaultWebCallback)),
            ws_callback: self
                .ws_callback
                .unwrap_or_else(|| Arc::new(DefaultWsCallback)),
            bypass_host: self.bypass_host,
        })
    }

    /// Builds the dispatcher and subscribes it to `server`.
    pub fn attach(self, server: &mut Server) -> Result<Arc<Dispatcher>, SetupError> {
        let dispatcher = Arc::new(self.build()?);
        server.subscribe(dispatcher.clone());
        Ok(dispatcher)
    }
}
