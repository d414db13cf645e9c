//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (address, port, limits).
    pub listener: ListenerConfig,

    /// Application settings (paths, error reporting, keepalive).
    pub app: AppConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (IP literal).
    pub addr: String,

    /// Bind port. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 4567,
            max_connections: 10_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ListenerConfig {
    /// `addr:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.addr.contains(':') && !self.addr.starts_with('[') {
            format!("[{}]:{}", self.addr, self.port)
        } else {
            format!("{}:{}", self.addr, self.port)
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Base directory for relative paths.
    pub root: PathBuf,

    /// Static files directory, relative to `root`.
    pub public_dir: String,

    /// Template directory, relative to `root`.
    pub views_dir: String,

    /// Log unexpected request failures with full detail.
    pub report_errors: bool,

    /// Interval between WebSocket keepalive pings.
    pub ping_secs: u64,

    /// How long shutdown waits for in-flight connections.
    pub drain_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            public_dir: "public".to_string(),
            views_dir: "views".to_string(),
            report_errors: false,
            ping_secs: 30,
            drain_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn public_path(&self) -> PathBuf {
        self.root.join(&self.public_dir)
    }

    pub fn views_path(&self) -> PathBuf {
        self.root.join(&self.views_dir)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Prometheus exporter address; disabled when absent.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listener.bind_address(), "127.0.0.1:4567");
        assert_eq!(config.app.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            port = 9000

            [app]
            root = "/srv/site"
            report_errors = true
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.addr, "127.0.0.1");
        assert!(config.app.report_errors);
        assert_eq!(config.app.public_path(), PathBuf::from("/srv/site/public"));
        assert_eq!(config.app.views_path(), PathBuf::from("/srv/site/views"));
    }

    #[test]
    fn ipv6_bind_address() {
        let listener = ListenerConfig {
            addr: "::1".to_string(),
            port: 80,
            ..ListenerConfig::default()
        };
        assert_eq!(listener.bind_address(), "[::1]:80");
    }
}
