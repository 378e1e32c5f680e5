use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::proxy::target::TargetConfig;

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Base target for plain requests
    pub web: TargetConfig,
    /// Base target for upgraded connections
    pub ws: TargetConfig,
    /// Take the target hostname from the client's `:authority`/`Host`
    pub bypass_host: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let upstream = TargetConfig::from_url(DEFAULT_UPSTREAM).unwrap_or_default();
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            web: upstream.clone(),
            ws: upstream,
            bypass_host: false,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Loads the YAML file named by `PROXY_CONFIG`, if any, then applies `LISTEN`.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("PROXY_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                Self::from_yaml(&content).with_context(|| format!("invalid config file {path}"))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
