use std::sync::Arc;

use sentinel_bypass::config::Config;
use sentinel_bypass::proxy::{HttpForwarder, ProxyBuilder};
use sentinel_bypass::server::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut server = Server::bind(&cfg.listen_addr).await?;
    let forwarder = HttpForwarder::new(cfg.connect_timeout(), cfg.request_timeout());

    ProxyBuilder::new(Arc::new(forwarder))
        .web_target(cfg.web.clone())
        .ws_target(cfg.ws.clone())
        .bypass_host(cfg.bypass_host)
        .attach(&mut server)?;

    tracing::info!(
        web = %cfg.web.socket_addr(),
        ws = %cfg.ws.socket_addr(),
        bypass_host = cfg.bypass_host,
        "Proxy attached"
    );

    tokio::select! {
        res = server.run() => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
