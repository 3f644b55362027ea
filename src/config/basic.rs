use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use url::Url;

/// Basic (core) configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// HTTP server listen address (e.g., "0.0.0.0", "127.0.0.1").
    /// TOML: `basic.listen_addr`. Default: `0.0.0.0`.
    #[serde(default = "default_listen_ip")]
    pub listen_addr: IpAddr,

    /// HTTP server listen port.
    /// TOML: `basic.listen_port`. Default: `8190`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Database URL for SQLite.
    /// TOML: `basic.database_url`. Default: `sqlite://revlink.db`.
    #[serde(default)]
    pub database_url: String,

    /// Log level for tracing subscriber initialization.
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default)]
    pub loglevel: String,

    /// Shared secret the provider sends back in `X-Gitlab-Token` on webhook
    /// deliveries (required, non-empty). Also set on hooks we create.
    /// TOML: `basic.webhook_secret`. Must be provided.
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_string_lax")]
    pub webhook_secret: String,

    /// Session lifetime in seconds.
    /// TOML: `basic.session_ttl_secs`. Default: `86400` (one day).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Externally reachable base URL of this service; used to derive the
    /// default webhook callback URL (`{public_base_url}/webhook/gitlab`).
    /// TOML: `basic.public_base_url`. Default: unset.
    #[serde(default)]
    pub public_base_url: Option<Url>,

    /// Interval for the optional installation reconciliation sweep.
    /// `0` disables the sweep.
    /// TOML: `basic.reconcile_interval_secs`. Default: `0`.
    #[serde(default)]
    pub reconcile_interval_secs: u64,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_ip(),
            listen_port: default_listen_port(),
            database_url: "sqlite://revlink.db".to_string(),
            loglevel: "info".to_string(),
            // No insecure default. `Config::from_toml()` enforces non-empty.
            webhook_secret: String::new(),
            session_ttl_secs: default_session_ttl_secs(),
            public_base_url: None,
            reconcile_interval_secs: 0,
        }
    }
}

fn deserialize_string_lax<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;

    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom(
            "expected a string or a number for basic.webhook_secret",
        )),
    }
}

/// Default IP address for the HTTP server listen address.
fn default_listen_ip() -> IpAddr {
    Ipv4Addr::new(0, 0, 0, 0).into()
}

/// Default port for the HTTP server.
fn default_listen_port() -> u16 {
    8190
}

fn default_session_ttl_secs() -> u64 {
    86_400
}
