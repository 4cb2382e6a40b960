//! Business label reconciler configuration
//!
//! Configuration is loaded from a YAML file (usually mounted from a
//! `ConfigMap`) and carries the category table together with the engine
//! knobs: worker count, per-call timeout and retry policy.

pub mod table;

pub use table::{CategoryEntry, CategoryTable, Overlap};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default classification label key
pub const DEFAULT_LABEL_KEY: &str = "business";

lazy_static! {
    static ref LABEL_NAME_RE: Regex =
        Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid regex");
    static ref DNS_SUBDOMAIN_RE: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("valid regex");
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How an absent classification label compares to the fallback category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnsetPolicy {
    /// An absent label is drift for every target, fallback included
    #[default]
    Write,
    /// An absent label counts as converged when the target is the fallback
    FallbackConverged,
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelerConfig {
    /// Label key carrying the business category
    #[serde(default = "default_label_key")]
    pub label_key: String,

    #[serde(default)]
    pub unset_policy: UnsetPolicy,

    /// Category table; `categories` and `fallback` sit at the top level of the file
    #[serde(flatten)]
    pub table: CategoryTable,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of controllers reconciled concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Timeout applied to every individual API call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient API failures and write conflicts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts per call, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_label_key() -> String {
    DEFAULT_LABEL_KEY.to_string()
}

fn default_workers() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), doubling and capped
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1_u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl EngineConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LabelerConfig {
    /// Configuration with default engine settings around the given table
    #[must_use]
    pub fn with_table(table: CategoryTable) -> Self {
        Self {
            label_key: default_label_key(),
            unset_policy: UnsetPolicy::default(),
            table,
            engine: EngineConfig::default(),
        }
    }

    /// Load and validate configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration can drive a reconciliation run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_label_key(&self.label_key) {
            return Err(ConfigError::Invalid(format!(
                "label key '{}' is not a valid Kubernetes label key",
                self.label_key
            )));
        }

        let mut names = BTreeSet::new();
        for entry in &self.table.categories {
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "category '{}' is declared more than once",
                    entry.name
                )));
            }
        }

        for value in self.table.values() {
            if value.is_empty() || !is_valid_label_value(value) {
                return Err(ConfigError::Invalid(format!(
                    "category '{value}' is not a valid Kubernetes label value"
                )));
            }
        }

        if self.engine.workers == 0 {
            return Err(ConfigError::Invalid(
                "engine.workers must be at least 1".to_string(),
            ));
        }

        if self.engine.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.requestTimeoutSecs must be at least 1".to_string(),
            ));
        }

        if self.engine.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "engine.retry.maxAttempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Kubernetes label value syntax: empty, or at most 63 characters of
/// alphanumerics, `-`, `_` and `.`, starting and ending alphanumeric
#[must_use]
pub fn is_valid_label_value(value: &str) -> bool {
    value.is_empty() || (value.len() <= 63 && LABEL_NAME_RE.is_match(value))
}

/// Kubernetes label key syntax: an optional DNS subdomain prefix and `/`,
/// followed by a non-empty name with label value syntax
#[must_use]
pub fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 || !DNS_SUBDOMAIN_RE.is_match(prefix) {
            return false;
        }
    }

    !name.is_empty() && is_valid_label_value(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r"
fallback: other
categories:
  - name: chief
    members: [svc-a]
  - name: quote
    members: [svc-b]
engine:
  workers: 4
  retry:
    maxAttempts: 5
";

    #[test]
    fn parses_sample_with_defaults() {
        let config = LabelerConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.label_key, "business");
        assert_eq!(config.unset_policy, UnsetPolicy::Write);
        assert_eq!(config.table.fallback, "other");
        assert_eq!(config.table.categories.len(), 2);
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.engine.request_timeout_secs, 10);
        assert_eq!(config.engine.retry.max_attempts, 5);
        assert_eq!(config.engine.retry.initial_backoff_ms, 200);
    }

    #[test]
    fn parses_unset_policy() {
        let yaml = "fallback: other\nunsetPolicy: fallback-converged\n";
        let config = LabelerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.unset_policy, UnsetPolicy::FallbackConverged);
    }

    #[test]
    fn rejects_duplicate_categories() {
        let yaml = r"
fallback: other
categories:
  - name: chief
  - name: chief
";
        let err = LabelerConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_invalid_category_value() {
        let yaml = "fallback: 'not valid!'\n";
        assert!(matches!(
            LabelerConfig::from_yaml_str(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let yaml = "fallback: other\nengine:\n  workers: 0\n";
        assert!(LabelerConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn missing_fallback_is_parse_error() {
        let yaml = "categories: []\n";
        assert!(matches!(
            LabelerConfig::from_yaml_str(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn label_syntax() {
        assert!(is_valid_label_value("chief"));
        assert!(is_valid_label_value("a.b_c-d"));
        assert!(is_valid_label_value(""));
        assert!(!is_valid_label_value("-chief"));
        assert!(!is_valid_label_value(&"a".repeat(64)));

        assert!(is_valid_label_key("business"));
        assert!(is_valid_label_key("example.com/business"));
        assert!(!is_valid_label_key("Example.com/business"));
        assert!(!is_valid_label_key("/business"));
        assert!(!is_valid_label_key(""));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(300));
        assert_eq!(retry.backoff(30), Duration::from_millis(300));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = LabelerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.table.lookup("svc-b"), Some("quote"));
    }

    #[test]
    fn deploy_sample_is_valid() {
        let config = LabelerConfig::from_yaml_str(include_str!("../../../deploy/labeler.yaml")).unwrap();
        assert_eq!(config, LabelerConfig::with_table(config.table.clone()));
        assert!(config.table.overlaps().is_empty());
    }

    #[test]
    fn missing_file_is_read_error() {
        assert!(matches!(
            LabelerConfig::from_file("/nonexistent/labeler.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
