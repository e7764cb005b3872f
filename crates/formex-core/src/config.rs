use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_CHANNEL: &str = "formex:content-updates";
pub const MAX_WEBHOOK_BYTES: usize = 64 * 1024; // 64 KB cap per notification

/// Environment variables read on top of the file layer. Names are matched
/// case-insensitively and lowercased into the field names below.
const ENV_KEYS: &[&str] = &[
    "port",
    "bind",
    "redis_url",
    "redis_channel",
    "webhook_auth",
    "webhook_secret",
];

/// Relay configuration (optional TOML file + raw env overrides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Connection URL shared by the publisher and subscriber connections.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Bus channel; every relay instance and publisher must agree on it.
    #[serde(default = "default_channel")]
    pub redis_channel: String,
    #[serde(default)]
    pub webhook_auth: WebhookAuthMode,
    /// Bearer token or HMAC key, depending on `webhook_auth`.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Authentication applied to `POST /webhook` before it is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuthMode {
    /// HMAC-SHA256 over the raw request body (`X-Hub-Signature-256`).
    HmacSha256,
    /// Static bearer token in the Authorization header.
    BearerToken,
    /// No authentication: only behind a trusted proxy or private network.
    #[default]
    None,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_channel: DEFAULT_CHANNEL.to_string(),
            webhook_auth: WebhookAuthMode::None,
            webhook_secret: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}
fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

impl RelayConfig {
    /// Load config: built-in defaults, then the TOML file (if given), then
    /// `PORT` / `REDIS_URL` / `REDIS_CHANNEL` / ... from the environment.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        Self::figment(config_path)
            .extract::<RelayConfig>()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?
            .validated()
    }

    fn figment(config_path: Option<&str>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::raw().only(ENV_KEYS))
    }

    /// Reject combinations that would leave the webhook silently open.
    fn validated(self) -> crate::error::Result<Self> {
        if self.redis_channel.trim().is_empty() {
            warn!("config rejected: empty redis_channel");
            return Err(crate::error::RelayError::Config(
                "redis_channel must not be empty".to_string(),
            ));
        }
        let needs_secret = self.webhook_auth != WebhookAuthMode::None;
        let has_secret = self
            .webhook_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if needs_secret && !has_secret {
            warn!(mode = ?self.webhook_auth, "config rejected: webhook auth without a secret");
            return Err(crate::error::RelayError::Config(format!(
                "webhook_auth = {:?} requires webhook_secret",
                self.webhook_auth
            )));
        }
        if self.webhook_auth == WebhookAuthMode::None {
            debug!("webhook auth disabled; relay must sit behind a trusted proxy");
        }
        Ok(self)
    }

    /// `bind:port` string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
