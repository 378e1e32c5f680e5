//! Tests for event dispatch against a recording forwarder

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use sentinel_bypass::error::{ProxyError, SetupError};
use sentinel_bypass::http::request::{Method, Request, RequestBuilder};
use sentinel_bypass::http::response::{Response, StatusCode};
use sentinel_bypass::proxy::{
    Dispatcher, Forwarder, ProxyBuilder, TargetConfig, WebCallback, WsCallback,
};
use sentinel_bypass::server::{EventListener, Responder, ServerEvent, Socket};
use tokio::io::AsyncReadExt;

#[derive(Default)]
struct RecordingForwarder {
    web_calls: Mutex<Vec<TargetConfig>>,
    ws_calls: Mutex<Vec<(TargetConfig, Bytes)>>,
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn web(
        &self,
        _request: Request,
        response: Responder,
        target: &TargetConfig,
        _on_error: &dyn WebCallback,
    ) {
        self.web_calls.lock().unwrap().push(target.clone());
        response.send(Response::ok("forwarded"));
    }

    async fn ws(
        &self,
        _request: Request,
        _socket: Socket,
        head: Bytes,
        target: &TargetConfig,
        _on_error: &dyn WsCallback,
    ) {
        self.ws_calls.lock().unwrap().push((target.clone(), head));
    }
}

/// Fails every call the way a refused upstream would.
struct FailingForwarder;

#[async_trait]
impl Forwarder for FailingForwarder {
    async fn web(
        &self,
        request: Request,
        response: Responder,
        _target: &TargetConfig,
        on_error: &dyn WebCallback,
    ) {
        on_error.on_error(ProxyError::Timeout { stage: "connect" }, &request, response);
    }

    async fn ws(
        &self,
        request: Request,
        socket: Socket,
        head: Bytes,
        _target: &TargetConfig,
        on_error: &dyn WsCallback,
    ) {
        on_error.on_error(ProxyError::Timeout { stage: "connect" }, &request, socket, head);
    }
}

fn web_base() -> TargetConfig {
    TargetConfig::from_url("http://web.upstream:3000").unwrap()
}

fn ws_base() -> TargetConfig {
    TargetConfig::from_url("http://ws.upstream:3001").unwrap()
}

fn dispatcher(forwarder: Arc<dyn Forwarder>, bypass_host: bool) -> Dispatcher {
    ProxyBuilder::new(forwarder)
        .web_target(web_base())
        .ws_target(ws_base())
        .bypass_host(bypass_host)
        .build()
        .unwrap()
}

fn request(headers: &[(&str, &str)]) -> Request {
    headers
        .iter()
        .fold(RequestBuilder::new().method(Method::GET).path("/"), |b, (k, v)| {
            b.header(*k, *v)
        })
        .build()
        .unwrap()
}

async fn send_request(dispatcher: &Dispatcher, request: Request) -> Response {
    let (response, rx) = Responder::channel();
    dispatcher
        .on_event(ServerEvent::Request { request, response })
        .await;
    rx.await.expect("dispatcher must answer every request")
}

fn upgrade_socket() -> (tokio::io::DuplexStream, Socket) {
    let (client, server) = tokio::io::duplex(1024);
    (client, Box::new(server))
}

#[test]
fn test_build_requires_targets() {
    let forwarder: Arc<dyn Forwarder> = Arc::new(RecordingForwarder::default());

    assert_eq!(
        ProxyBuilder::new(forwarder.clone()).ws_target(ws_base()).build().err(),
        Some(SetupError::MissingTarget("web"))
    );
    assert_eq!(
        ProxyBuilder::new(forwarder).web_target(web_base()).build().err(),
        Some(SetupError::MissingTarget("ws"))
    );
}

#[tokio::test]
async fn test_override_disabled_forwards_base_target() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), false);

    let response = send_request(&dispatcher, request(&[("Host", "anything.example:9999")])).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(*forwarder.web_calls.lock().unwrap(), vec![web_base()]);
}

#[tokio::test]
async fn test_override_disabled_ignores_malformed_host() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), false);

    send_request(&dispatcher, request(&[("Host", "bad:port:text")])).await;

    assert_eq!(*forwarder.web_calls.lock().unwrap(), vec![web_base()]);
}

#[tokio::test]
async fn test_override_uses_authority_hostname_and_base_port() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), true);

    send_request(
        &dispatcher,
        request(&[(":authority", "svc.internal:8443"), ("Host", "ignored.example")]),
    )
    .await;

    let calls = forwarder.web_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], web_base().with_hostname("svc.internal"));
    assert_eq!(calls[0].port, 3000);
}

#[tokio::test]
async fn test_override_falls_back_to_host_header() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), true);

    send_request(&dispatcher, request(&[("Host", "example.com")])).await;

    assert_eq!(forwarder.web_calls.lock().unwrap()[0].hostname, "example.com");
}

#[tokio::test]
async fn test_override_without_host_keeps_base() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), true);

    send_request(&dispatcher, request(&[])).await;

    assert_eq!(*forwarder.web_calls.lock().unwrap(), vec![web_base()]);
}

#[tokio::test]
async fn test_malformed_authority_reaches_default_callback_not_forwarder() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), true);

    let response = send_request(&dispatcher, request(&[(":authority", "svc:::99999")])).await;

    assert_eq!(response.status, StatusCode::BadRequest);
    assert!(forwarder.web_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_resolution_and_forwarding_errors_share_callback() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let build = |forwarder: Arc<dyn Forwarder>| {
        let seen = seen.clone();
        ProxyBuilder::new(forwarder)
            .web_target(web_base())
            .ws_target(ws_base())
            .bypass_host(true)
            .web_callback(move |err: ProxyError, req: &Request, res: Responder| {
                seen.lock().unwrap().push((err.to_string(), req.path.clone()));
                res.send(Response::error(StatusCode::ServiceUnavailable));
            })
            .build()
            .unwrap()
    };

    let recording = Arc::new(RecordingForwarder::default());
    let response = send_request(&build(recording.clone()), request(&[("Host", "h:0")])).await;
    assert_eq!(response.status, StatusCode::ServiceUnavailable);
    assert!(recording.web_calls.lock().unwrap().is_empty());

    let response = send_request(&build(Arc::new(FailingForwarder)), request(&[("Host", "h")])).await;
    assert_eq!(response.status, StatusCode::ServiceUnavailable);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "invalid host `h:0`");
    assert_eq!(seen[1].0, "upstream connect timed out");
}

#[tokio::test]
async fn test_default_web_callback_maps_forwarding_error_status() {
    let dispatcher = dispatcher(Arc::new(FailingForwarder), false);

    let response = send_request(&dispatcher, request(&[])).await;

    assert_eq!(response.status, StatusCode::GatewayTimeout);
}

#[tokio::test]
async fn test_upgrade_forwards_ws_target_with_head() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), true);
    let (_client, socket) = upgrade_socket();

    dispatcher
        .on_event(ServerEvent::Upgrade {
            request: request(&[("Host", "live.example:443"), ("Upgrade", "websocket")]),
            socket,
            head: Bytes::from_static(b"early"),
        })
        .await;

    let calls = forwarder.ws_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ws_base().with_hostname("live.example"));
    assert_eq!(calls[0].1, Bytes::from_static(b"early"));
    assert!(forwarder.web_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upgrade_with_malformed_host_destroys_socket() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let dispatcher = dispatcher(forwarder.clone(), true);
    let (mut client, socket) = upgrade_socket();

    dispatcher
        .on_event(ServerEvent::Upgrade {
            request: request(&[("Host", "svc:::99999")]),
            socket,
            head: Bytes::new(),
        })
        .await;

    assert!(forwarder.ws_calls.lock().unwrap().is_empty());

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_upgrade_custom_callback_receives_socket() {
    let seen = Arc::new(Mutex::new(None));
    let seen_cb = seen.clone();
    let dispatcher = ProxyBuilder::new(Arc::new(FailingForwarder))
        .web_target(web_base())
        .ws_target(ws_base())
        .ws_callback(move |err: ProxyError, _req: &Request, _socket: Socket, head: Bytes| {
            *seen_cb.lock().unwrap() = Some((err.status_code(), head));
        })
        .build()
        .unwrap();
    let (_client, socket) = upgrade_socket();

    dispatcher
        .dispatch_upgrade(request(&[]), socket, Bytes::from_static(b"x"))
        .await;

    let seen = seen.lock().unwrap().take().unwrap();
    assert_eq!(seen.0, StatusCode::GatewayTimeout);
    assert_eq!(seen.1, Bytes::from_static(b"x"));
}

#[test]
fn test_dispatcher_absorbs_only_benign_transport_errors() {
    let dispatcher = dispatcher(Arc::new(RecordingForwarder::default()), false);

    assert!(dispatcher
        .on_transport_error(io::Error::from(io::ErrorKind::ConnectionReset))
        .is_ok());
    assert!(dispatcher
        .on_transport_error(io::Error::from(io::ErrorKind::BrokenPipe))
        .is_ok());

    let fatal = dispatcher
        .on_transport_error(io::Error::from(io::ErrorKind::PermissionDenied))
        .unwrap_err();
    assert_eq!(fatal.kind(), io::ErrorKind::PermissionDenied);
}
