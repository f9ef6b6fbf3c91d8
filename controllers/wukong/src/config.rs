//! Controller configuration loaded from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONCURRENCY: u16 = 3;
const DEFAULT_DEBOUNCE_SECONDS: u64 = 5;
const DEFAULT_STEP_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,
    /// Concurrent reconciliations per watched kind
    pub concurrency: u16,
    /// Quiet period after the last event before reconciling
    pub debounce: Duration,
    /// Upper bound for each synthesis step
    pub step_timeout: Duration,
    /// Bind address of the health and metrics server
    pub metrics_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when a variable is set to a malformed value.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value
    /// of a variable or `None` when it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());
        let concurrency = parse_or(&lookup, "RECONCILE_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        let debounce = parse_or(&lookup, "DEBOUNCE_SECONDS", DEFAULT_DEBOUNCE_SECONDS)?;
        let step_timeout = parse_or(&lookup, "STEP_TIMEOUT_SECONDS", DEFAULT_STEP_TIMEOUT_SECONDS)?;
        if step_timeout == 0 {
            return Err(ControllerError::InvalidConfig(
                "STEP_TIMEOUT_SECONDS must be at least 1".to_string(),
            ));
        }
        let metrics_addr = match lookup("METRICS_ADDR") {
            Some(raw) => parse_value("METRICS_ADDR", &raw)?,
            None => parse_value("METRICS_ADDR", DEFAULT_METRICS_ADDR)?,
        };
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("" | "text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )));
            }
        };

        Ok(Self {
            namespace,
            concurrency,
            debounce: Duration::from_secs(debounce),
            step_timeout: Duration::from_secs(step_timeout),
            metrics_addr,
            log_format,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ControllerError> {
    match lookup(key) {
        Some(raw) if !raw.is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ControllerError> {
    raw.trim()
        .parse()
        .map_err(|_| ControllerError::InvalidConfig(format!("{key} has an invalid value '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.debounce, Duration::from_secs(5));
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.metrics_addr.port(), 8080);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "vms"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("DEBOUNCE_SECONDS", "0"),
            ("STEP_TIMEOUT_SECONDS", "12"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("vms"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.debounce, Duration::ZERO);
        assert_eq!(config.step_timeout, Duration::from_secs(12));
        assert_eq!(config.metrics_addr.to_string(), "127.0.0.1:9090");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_namespace_means_all() {
        let config = load(&[("WATCH_NAMESPACE", "")]).unwrap();
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(matches!(
            load(&[("RECONCILE_CONCURRENCY", "many")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("RECONCILE_CONCURRENCY", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("STEP_TIMEOUT_SECONDS", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("METRICS_ADDR", "localhost")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
