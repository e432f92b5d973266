//! Relay configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use application::RelayOptions;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Relay configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `RELAY_BATCH_SIZE`: entries per round (default: `100`)
/// - `RELAY_POLL_INTERVAL_MS`: idle pause in milliseconds (default: `500`)
/// - `METRICS_ADDR`: Prometheus listener, e.g. `0.0.0.0:9000` (default: disabled)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub metrics_addr: Option<SocketAddr>,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5u32)?;
        if max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "0", "must be positive"));
        }
        let batch_size = parse_or(&lookup, "RELAY_BATCH_SIZE", 100usize)?;
        if batch_size == 0 {
            return Err(invalid("RELAY_BATCH_SIZE", "0", "must be positive"));
        }
        let poll_interval = Duration::from_millis(parse_or(&lookup, "RELAY_POLL_INTERVAL_MS", 500u64)?);

        let metrics_addr = match lookup("METRICS_ADDR") {
            Some(addr) if !addr.trim().is_empty() => Some(
                addr.trim()
                    .parse()
                    .map_err(|_| invalid("METRICS_ADDR", &addr, "expected host:port"))?,
            ),
            _ => None,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected pretty or json")),
        };

        Ok(Self {
            database_url,
            max_connections,
            batch_size,
            poll_interval,
            metrics_addr,
            log_format,
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| invalid(var, &value, "expected a number")),
        None => Ok(default),
    }
}

fn invalid(var: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config =
            RelayConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/app")]))
                .unwrap();

        assert_eq!(config.max_connections, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.metrics_addr, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.relay_options(), RelayOptions::default());
    }

    #[test]
    fn test_database_url_is_required() {
        assert_eq!(
            RelayConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("RELAY_BATCH_SIZE", "25"),
            ("RELAY_POLL_INTERVAL_MS", "50"),
            ("METRICS_ADDR", "127.0.0.1:9000"),
            ("LOG_FORMAT", "json"),
            ("RUST_LOG", "relay=debug"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level, "relay=debug");
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let result = RelayConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("RELAY_BATCH_SIZE", "lots"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                var: "RELAY_BATCH_SIZE",
                ..
            })
        ));

        let result = RelayConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("RELAY_BATCH_SIZE", "0"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let result = RelayConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("LOG_FORMAT", "xml"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                var: "LOG_FORMAT",
                ..
            })
        ));
    }
}
