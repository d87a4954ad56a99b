// src/config.rs

//! Client configuration: endpoint, credentials, TLS, retry and keepalive
//! parameters recognized at connection construction.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_keepalive_delay_secs() -> u64 {
    60
}

/// Parameters for one endpoint. Immutable once a connection is built from
/// them; a `SELECT` issued against the server does not update `database`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database index selected after the handshake. Ignored in cluster mode,
    /// where only database 0 exists.
    #[serde(default)]
    pub database: u32,
    /// `AUTH` is sent during the handshake iff a password is present; the
    /// two-argument form is used when a username is also configured.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// When set, the raw TCP socket is TLS-wrapped before the handshake.
    #[serde(skip)]
    pub tls: Option<TlsOptions>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: 0,
            username: None,
            password: None,
            tls: None,
            retry: RetryConfig::default(),
            keepalive: KeepaliveConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port`, also used as the node identifier in cluster mode.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Derives the config for another cluster node: same credentials, TLS and
    /// policies, the node's own endpoint, and database 0.
    pub fn for_node(&self, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            database: 0,
            ..self.clone()
        }
    }
}

/// Prepared TLS client state. Loading certificates and building the
/// `rustls::ClientConfig` is the caller's concern.
#[derive(Clone)]
pub struct TlsOptions {
    /// Name presented for SNI and certificate verification.
    pub server_name: String,
    pub config: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Reconnection policy applied by `ensure_live` when a socket is found
/// closed or broken at the start of a synchronous call.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on reconnection attempts per call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
        }
    }
}

/// Sleep schedule between reconnection attempts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// The same delay before every attempt.
    Fixed { millis: u64 },
    /// `base * 2^(attempt-1)`, capped.
    Exponential { base_millis: u64, cap_millis: u64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base_millis: 50,
            cap_millis: 2_000,
        }
    }
}

impl BackoffStrategy {
    /// Delay before attempt `n` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffStrategy::Fixed { millis } => Duration::from_millis(millis),
            BackoffStrategy::Exponential {
                base_millis,
                cap_millis,
            } => {
                let factor = 1u64 << attempt.saturating_sub(1).min(16);
                Duration::from_millis(base_millis.saturating_mul(factor).min(cap_millis))
            }
        }
    }
}

/// OS-level TCP keepalive, applied to the socket before any protocol bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Idle time before the first probe, also used as the probe interval.
    #[serde(default = "default_keepalive_delay_secs")]
    pub delay_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_secs: default_keepalive_delay_secs(),
        }
    }
}
