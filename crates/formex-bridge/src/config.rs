use std::time::Duration;

use url::Url;

use crate::error::BridgeError;

/// Relay used when none is configured but the page runs on a dev host.
pub const DEFAULT_RELAY_URL: &str = "http://localhost:3001";
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Path segment the relay serves its WebSocket endpoint on.
const WS_PATH: &str = "ws";
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Explicit relay URL (`http(s)://` or `ws(s)://`). Blank counts as unset.
    pub relay_url: Option<String>,
    /// Host name of the page the bridge runs for; decides the dev fallback.
    pub page_host: Option<String>,
    /// Consecutive failed connection attempts tolerated before giving up.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            page_host: None,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl BridgeConfig {
    pub fn with_relay_url(url: impl Into<String>) -> Self {
        Self {
            relay_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// WebSocket URL to connect to, or `None` when the bridge stays inert.
    ///
    /// An explicit URL always wins. Without one, only local development
    /// hosts fall back to [`DEFAULT_RELAY_URL`].
    pub fn resolve_url(&self) -> Result<Option<String>, BridgeError> {
        let explicit = self
            .relay_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let base = match explicit {
            Some(url) => url,
            None if self.page_host.as_deref().is_some_and(is_local_host) => DEFAULT_RELAY_URL,
            None => return Ok(None),
        };
        to_ws_url(base).map(Some)
    }
}

/// `localhost`, `127.0.0.1` or `::1`, with or without IPv6 brackets.
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    LOCAL_HOSTS.iter().any(|local| host.eq_ignore_ascii_case(local))
}

/// Map a relay base URL onto its WebSocket endpoint.
///
/// `http(s)` becomes `ws(s)` with a `ws` segment appended to the path. A
/// `ws(s)` URL is taken as is, unless it has no path, in which case `/ws` is
/// added. Query and fragment are preserved.
pub fn to_ws_url(raw: &str) -> Result<String, BridgeError> {
    let invalid = |reason| BridgeError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|_| invalid("not an absolute URL"))?;
    let (ws_scheme, always_append) = match url.scheme() {
        "http" => ("ws", true),
        "https" => ("wss", true),
        "ws" => ("ws", false),
        "wss" => ("wss", false),
        _ => return Err(invalid("scheme must be http, https, ws or wss")),
    };
    if !url.has_host() {
        return Err(invalid("missing host"));
    }

    if always_append || url.path() == "/" {
        url.path_segments_mut()
            .map_err(|_| invalid("URL cannot carry a path"))?
            .pop_if_empty()
            .push(WS_PATH);
    }
    url.set_scheme(ws_scheme)
        .map_err(|_| invalid("scheme cannot be switched"))?;
    Ok(url.into())
}
