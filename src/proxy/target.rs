//! Upstream target configuration
//!
//! A [`TargetConfig`] is built once at startup and shared read-only by every
//! event. Per-event overrides never touch it; they clone it and replace a
//! single field.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Scheme used to reach the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// TLS settings for `https` upstreams.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// SNI name to present instead of the target hostname
    pub server_name: Option<String>,
    /// Extra CA bundle to trust
    pub ca_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

/// Where and how a call is forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub protocol: Protocol,

    /// Upstream hostname; the only field a host override replaces
    pub hostname: String,

    pub port: u16,

    /// Request path sent upstream; `None` keeps the client's path
    pub path: Option<String>,

    /// Headers added to (or replacing) the forwarded request's headers
    pub headers: BTreeMap<String, String>,

    /// Connect timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Timeout for the upstream response in milliseconds
    pub proxy_timeout_ms: Option<u64>,

    /// Name announced in the `Via` header
    pub proxy_name: Option<String>,

    pub tls: TlsOptions,

    /// Engine-specific settings the core passes through untouched
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            hostname: "localhost".to_string(),
            port: 80,
            path: None,
            headers: BTreeMap::new(),
            timeout_ms: None,
            proxy_timeout_ms: None,
            proxy_name: None,
            tls: TlsOptions::default(),
            extensions: BTreeMap::new(),
        }
    }
}

impl TargetConfig {
    /// Builds a target from a URL such as `http://127.0.0.1:3000/api`.
    ///
    /// A path other than `/` becomes the fixed upstream path.
    pub fn from_url(raw: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("invalid target URL `{raw}`"))?;

        let protocol = match url.scheme() {
            "http" | "ws" => Protocol::Http,
            "https" | "wss" => Protocol::Https,
            other => anyhow::bail!("unsupported target scheme `{other}`"),
        };
        let hostname = url.host_str().context("target URL missing host")?.to_string();
        let port = url.port().unwrap_or(match protocol {
            Protocol::Https => 443,
            Protocol::Http => 80,
        });
        let path = match url.path() {
            "" | "/" => None,
            p => Some(match url.query() {
                Some(q) => format!("{p}?{q}"),
                None => p.to_string(),
            }),
        };

        Ok(Self {
            protocol,
            hostname,
            port,
            path,
            ..Self::default()
        })
    }

    /// Copy of this target pointing at another hostname.
    pub fn with_hostname(&self, hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..self.clone()
        }
    }

    /// `host:port` suitable for `TcpStream::connect`.
    ///
    /// Unbracketed IPv6 literals are bracketed.
    pub fn socket_addr(&self) -> String {
        if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Value for the upstream `Host` header; the default port is omitted.
    pub fn host_header(&self) -> String {
        let default_port = match self.protocol {
            Protocol::Http => 80,
            Protocol::Https => 443,
        };
        if self.port == default_port {
            self.hostname.clone()
        } else {
            self.socket_addr()
        }
    }

    /// The path to request upstream for a client request path.
    pub fn request_path<'a>(&'a self, client_path: &'a str) -> &'a str {
        match self.path.as_deref() {
            Some(path) => path,
            None if client_path.is_empty() => "/",
            None => client_path,
        }
    }
}
