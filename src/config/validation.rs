//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, limits > 0)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::net::{IpAddr, SocketAddr};

use super::schema::ServerConfig;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.addr.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.addr",
            format!("`{}` is not an IP address", config.listener.addr),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }
    if config.app.ping_secs == 0 {
        errors.push(ValidationError::new("app.ping_secs", "must be greater than 0"));
    }
    if config.app.public_dir.is_empty() {
        errors.push(ValidationError::new("app.public_dir", "must not be empty"));
    }
    if config.app.views_dir.is_empty() {
        errors.push(ValidationError::new("app.views_dir", "must not be empty"));
    }
    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", config.observability.log_level),
        ));
    }
    if let Some(address) = &config.observability.metrics_address {
        if address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "observability.metrics_address",
                format!("`{address}` is not a socket address"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.addr = "localhost".to_string();
        config.app.ping_secs = 0;
        config.observability.log_level = "loud".to_string();
        config.observability.metrics_address = Some("nowhere".to_string());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.addr",
                "app.ping_secs",
                "observability.log_level",
                "observability.metrics_address"
            ]
        );
    }

    #[test]
    fn ephemeral_port_is_allowed() {
        let mut config = ServerConfig::default();
        config.listener.port = 0;
        assert!(validate_config(&config).is_ok());
    }
}
