//! Host identifier parsing and target resolution
//!
//! Clients name the host they want in the `Host` header or the HTTP/2
//! `:authority` pseudo-header. When host override is enabled, that name
//! replaces the hostname of the configured target.

use std::borrow::Cow;

use crate::error::{HostError, ProxyError};
use crate::proxy::target::TargetConfig;

const DELIMITER: char = ':';

/// Hostname and port taken from a raw host identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHost {
    pub hostname: Option<String>,
    pub port: Option<u16>,
}

/// Splits a raw host identifier into hostname and port.
///
/// Input with more than one `:` is treated as an IPv6 literal followed by a
/// port: everything before the last `:` is the hostname. Brackets are not
/// interpreted, so `[::1]:443` yields hostname `[::1]` and `::1` yields
/// hostname `:` with port 1. A port with nothing in front of it (`:80`) is
/// rejected.
///
/// ```
/// # use sentinel_bypass::proxy::host::parse_host;
/// let parsed = parse_host("a:b:c:9090").unwrap();
/// assert_eq!(parsed.hostname.as_deref(), Some("a:b:c"));
/// assert_eq!(parsed.port, Some(9090));
/// ```
pub fn parse_host(raw: &str) -> Result<ParsedHost, HostError> {
    if raw.is_empty() {
        return Ok(ParsedHost::default());
    }

    let (hostname, port) = match raw.rsplit_once(DELIMITER) {
        None => (raw, None),
        Some((hostname, port)) => (hostname, Some(parse_port(port)?)),
    };

    if hostname.is_empty() {
        return Err(HostError::EmptyHostname);
    }

    Ok(ParsedHost {
        hostname: Some(hostname.to_string()),
        port,
    })
}

fn parse_port(segment: &str) -> Result<u16, HostError> {
    let valid = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
    valid
        .then(|| segment.parse::<u16>().ok())
        .flatten()
        .filter(|port| *port != 0)
        .ok_or_else(|| HostError::InvalidPort {
            port: segment.to_string(),
        })
}

/// Computes the target a call is forwarded to.
///
/// Without a host identifier the base target is returned as is. Otherwise the
/// parsed hostname replaces the base hostname and nothing else; the port in
/// the identifier is discarded. A malformed identifier is an error, never a
/// fallback to the base target.
pub fn resolve_target<'a>(
    raw: Option<&str>,
    base: &'a TargetConfig,
) -> Result<Cow<'a, TargetConfig>, ProxyError> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(Cow::Borrowed(base));
    };

    let parsed = parse_host(raw).map_err(|source| ProxyError::InvalidHost {
        host: raw.to_string(),
        source,
    })?;

    Ok(match parsed.hostname {
        Some(hostname) => Cow::Owned(base.with_hostname(hostname)),
        None => Cow::Borrowed(base),
    })
}
