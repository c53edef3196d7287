//! Processor configuration.
//!
//! Loaded from JSON, from `AHR_*` environment variables, or built in code.
//! Missing fields fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProcessorError;
use crate::logger::Severity;
use crate::pool::clamp_capacity;

/// Longest accepted request URL in bytes.
pub const MAX_URL_LEN: usize = 4096 - 1;

/// Largest accepted request body in bytes.
pub const MAX_BODY_SIZE: usize = 4096 * 16 - 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of request slots; clamped into `[1, 25]` when used.
    pub capacity: usize,
    /// Base endpoint that relative request targets are resolved against.
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub log_level: Severity,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            base_url: None,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            log_level: Severity::Info,
        }
    }
}

impl ProcessorConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ProcessorError> {
        serde_json::from_str(raw).map_err(|e| ProcessorError::Config(e.to_string()))
    }

    /// Like `from_json`, but fields missing from `raw` keep their value in
    /// `defaults` instead of the built-in default.
    pub fn from_json_with(raw: &str, defaults: Self) -> Result<Self, ProcessorError> {
        let config_err = |e: serde_json::Error| ProcessorError::Config(e.to_string());
        let overrides: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(config_err)?;
        let mut merged = serde_json::to_value(defaults).map_err(config_err)?;
        if let serde_json::Value::Object(fields) = &mut merged {
            fields.extend(overrides);
        }
        serde_json::from_value(merged).map_err(config_err)
    }

    /// Read `AHR_CAPACITY`, `AHR_BASE_URL`, `AHR_REQUEST_TIMEOUT_MS`,
    /// `AHR_CONNECT_TIMEOUT_MS` and `AHR_LOG_LEVEL` on top of the defaults.
    pub fn from_env() -> Result<Self, ProcessorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProcessorError> {
        let mut config = Self::default();
        if let Some(v) = lookup("AHR_CAPACITY") {
            config.capacity = parse_var("AHR_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("AHR_BASE_URL") {
            config.base_url = Some(v);
        }
        if let Some(v) = lookup("AHR_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("AHR_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("AHR_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse_var("AHR_CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("AHR_LOG_LEVEL") {
            config.log_level = v
                .parse()
                .map_err(|e| ProcessorError::Config(format!("AHR_LOG_LEVEL: {e}")))?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_log_level(mut self, level: Severity) -> Self {
        self.log_level = level;
        self
    }

    pub fn effective_capacity(&self) -> usize {
        clamp_capacity(self.capacity)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Resolve a request target into a full URL.
    ///
    /// Absolute `http://`/`https://` targets are used as given. Anything else
    /// is joined onto the base URL with exactly one `/` between the two.
    pub fn resolve_url(&self, target: &str) -> Result<http::Uri, ProcessorError> {
        let full = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            let base = self
                .base_url
                .as_deref()
                .ok_or_else(|| ProcessorError::InvalidUrl(format!("{target} (no base url)")))?;
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                target.trim_start_matches('/')
            )
        };
        if full.len() > MAX_URL_LEN {
            return Err(ProcessorError::InvalidUrl(format!(
                "url of {} bytes exceeds {MAX_URL_LEN}",
                full.len()
            )));
        }
        let uri: http::Uri = full
            .parse()
            .map_err(|e| ProcessorError::InvalidUrl(format!("{full}: {e}")))?;
        if uri.host().is_none() {
            return Err(ProcessorError::InvalidUrl(format!("{full}: missing host")));
        }
        Ok(uri)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ProcessorError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ProcessorError::Config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> ProcessorConfig {
        ProcessorConfig::new(4).with_base_url("http://localhost:3000/")
    }

    #[test]
    fn resolves_relative_targets_against_base() {
        let config = base();
        assert_eq!(
            config.resolve_url("items/1").unwrap().to_string(),
            "http://localhost:3000/items/1"
        );
        assert_eq!(
            config.resolve_url("/items").unwrap().to_string(),
            "http://localhost:3000/items"
        );
    }

    #[test]
    fn absolute_targets_bypass_base() {
        let config = ProcessorConfig::default();
        assert_eq!(
            config.resolve_url("http://example.com/x").unwrap().to_string(),
            "http://example.com/x"
        );
    }

    #[test]
    fn relative_target_without_base_is_rejected() {
        let err = ProcessorConfig::default().resolve_url("items").unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidUrl(_)));
    }

    #[test]
    fn overlong_url_is_rejected() {
        let long = "a".repeat(MAX_URL_LEN);
        let err = base().resolve_url(&long).unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidUrl(_)));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = ProcessorConfig::from_json(r#"{"capacity": 40, "log_level": "error"}"#).unwrap();
        assert_eq!(config.capacity, 40);
        assert_eq!(config.effective_capacity(), 25);
        assert_eq!(config.log_level, Severity::Error);
        assert_eq!(config.request_timeout_ms, 30_000);
        assert!(config.base_url.is_none());
    }

    #[test]
    fn json_errors_are_config_errors() {
        let err = ProcessorConfig::from_json("{").unwrap_err();
        assert!(matches!(err, ProcessorError::Config(_)));
    }

    #[test]
    fn json_overlays_caller_defaults() {
        let defaults = ProcessorConfig::new(4).with_log_level(Severity::Error);
        let config = ProcessorConfig::from_json_with(r#"{"capacity": 2}"#, defaults.clone()).unwrap();
        assert_eq!(config.capacity, 2);
        assert_eq!(config.log_level, Severity::Error);

        let config =
            ProcessorConfig::from_json_with(r#"{"log_level": "warning"}"#, defaults).unwrap();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.log_level, Severity::Warning);

        let err = ProcessorConfig::from_json_with("[1]", ProcessorConfig::default()).unwrap_err();
        assert!(matches!(err, ProcessorError::Config(_)));
    }

    #[test]
    fn oversized_timeouts_saturate() {
        let config = ProcessorConfig::default()
            .with_request_timeout(Duration::MAX)
            .with_connect_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(config.request_timeout_ms, u64::MAX);
        assert_eq!(config.connect_timeout_ms, u64::MAX);
    }

    #[test]
    fn env_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("AHR_CAPACITY", "3"),
            ("AHR_BASE_URL", "http://svc"),
            ("AHR_REQUEST_TIMEOUT_MS", "250"),
            ("AHR_LOG_LEVEL", "warning"),
        ]
        .into_iter()
        .collect();
        let config =
            ProcessorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.capacity, 3);
        assert_eq!(config.base_url.as_deref(), Some("http://svc"));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.log_level, Severity::Warning);
    }

    #[test]
    fn env_parse_failure_names_the_variable() {
        let err = ProcessorConfig::from_lookup(|k| {
            (k == "AHR_CAPACITY").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("AHR_CAPACITY"));
    }
}
