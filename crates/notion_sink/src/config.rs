//! Configuration for the Notion sink.

use crate::error::{SinkError, SinkResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

/// Notion API version sent in the `Notion-Version` header unless overridden.
pub const DEFAULT_API_VERSION: &str = "2025-09-03";

/// Base URL of the public Notion REST API.
pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";

/// Sink configuration, as found in the target's JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// OAuth access token, used when `token` is absent.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Database that rows are written into.
    #[serde(default)]
    pub database_id: Option<String>,
    /// Data source that rows are written into. Takes precedence over `database_id`.
    #[serde(default)]
    pub data_source_id: Option<String>,
    /// Include the page URL in the per-record state.
    #[serde(default)]
    pub output_record_url: bool,
    /// Value of the `Notion-Version` header.
    #[serde(default = "default_api_version", alias = "notion_api_version")]
    pub api_version: String,
    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl SinkConfig {
    /// Creates a configuration with the given bearer token and defaults elsewhere.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            access_token: None,
            database_id: None,
            data_source_id: None,
            output_record_url: false,
            api_version: default_api_version(),
            base_url: default_base_url(),
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> SinkResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SinkError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parses a configuration from a JSON string.
    pub fn from_json(raw: &str) -> SinkResult<Self> {
        serde_json::from_str(raw).map_err(|e| SinkError::Config(format!("invalid config: {}", e)))
    }

    /// Sets the target database.
    pub fn with_database_id(mut self, id: impl Into<String>) -> Self {
        self.database_id = Some(id.into());
        self
    }

    /// Sets the target data source.
    pub fn with_data_source_id(mut self, id: impl Into<String>) -> Self {
        self.data_source_id = Some(id.into());
        self
    }

    /// Enables or disables `record_url` in the per-record state.
    pub fn with_output_record_url(mut self, enabled: bool) -> Self {
        self.output_record_url = enabled;
        self
    }

    /// Sets the API version header value.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns the bearer credential (`token`, falling back to `access_token`).
    ///
    /// Empty strings count as absent.
    pub fn credential(&self) -> Option<&str> {
        non_empty(&self.token).or_else(|| non_empty(&self.access_token))
    }

    /// Returns the container rows are written into, if one is configured.
    pub fn container(&self) -> Option<ContainerRef> {
        non_empty(&self.data_source_id)
            .map(|id| ContainerRef::DataSource(id.to_string()))
            .or_else(|| {
                non_empty(&self.database_id).map(|id| ContainerRef::Database(id.to_string()))
            })
    }

    /// Checks that the configuration can be used to open a session.
    pub fn validate(&self) -> SinkResult<()> {
        if self.credential().is_none() {
            return Err(SinkError::Config(
                "either 'token' or 'access_token' is required".into(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(SinkError::Config("'api_version' must not be empty".into()));
        }
        Ok(())
    }
}

/// The schema-bearing collection rows are written into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    /// A database (`/databases/{id}`).
    Database(String),
    /// A data source (`/data_sources/{id}`).
    DataSource(String),
}

impl ContainerRef {
    /// Returns the container identifier.
    pub fn id(&self) -> &str {
        match self {
            ContainerRef::Database(id) | ContainerRef::DataSource(id) => id,
        }
    }

    /// Key used for this container in a page's `parent` object.
    pub fn parent_key(&self) -> &'static str {
        match self {
            ContainerRef::Database(_) => "database_id",
            ContainerRef::DataSource(_) => "data_source_id",
        }
    }

    /// Endpoint returning the container and its property schema.
    pub fn schema_endpoint(&self) -> String {
        match self {
            ContainerRef::Database(id) => format!("/databases/{}", id),
            ContainerRef::DataSource(id) => format!("/data_sources/{}", id),
        }
    }

    /// Endpoint for querying the container's pages.
    pub fn query_endpoint(&self) -> String {
        format!("{}/query", self.schema_endpoint())
    }

    /// The `parent` object for pages created in this container.
    pub fn parent(&self) -> Value {
        let mut parent = Map::new();
        parent.insert(
            self.parent_key().to_string(),
            Value::String(self.id().to_string()),
        );
        Value::Object(parent)
    }
}

/// How often and how patiently a record is re-sent after a retriable error.
///
/// Delays double from `base_delay` up to `max_delay`. With jitter enabled
/// each delay is stretched by up to a quarter so that parallel targets
/// hitting the same rate limit do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per record, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub base_delay: Duration,
    /// Cap on any single wait.
    pub max_delay: Duration,
    /// Stretch waits by a clock-derived fraction.
    pub jitter: bool,
}

impl RetryConfig {
    /// Allows `max_attempts` attempts per record, waiting 1s, 2s, 4s... up to 30s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Sets the wait before the second attempt.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the cap on any single wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Makes waits exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Wait before the next attempt once `failures` attempts have failed, or
    /// `None` when the record has used up its attempts.
    pub fn backoff(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.max_attempts {
            return None;
        }
        let doublings = (failures - 1).min(31);
        let wait = self
            .base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay);
        if !self.jitter {
            return Some(wait);
        }
        Some(wait + wait.mul_f64(0.25 * clock_fraction()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Sub-millisecond part of the wall clock as a fraction in `[0, 1)`.
fn clock_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1_000_000) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn config_defaults() {
        let config = SinkConfig::from_json(r#"{"token": "secret"}"#).unwrap();
        assert_eq!(config.credential(), Some("secret"));
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(!config.output_record_url);
        assert!(config.container().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn access_token_fallback() {
        let config = SinkConfig::from_json(r#"{"access_token": "oauth"}"#).unwrap();
        assert_eq!(config.credential(), Some("oauth"));

        let config =
            SinkConfig::from_json(r#"{"token": "direct", "access_token": "oauth"}"#).unwrap();
        assert_eq!(config.credential(), Some("direct"));

        let config = SinkConfig::from_json(r#"{"token": "", "access_token": "oauth"}"#).unwrap();
        assert_eq!(config.credential(), Some("oauth"));
        config.validate().unwrap();
    }

    #[test]
    fn missing_token_is_rejected() {
        let config = SinkConfig::from_json(r#"{"database_id": "db1"}"#).unwrap();
        assert!(matches!(config.validate(), Err(SinkError::Config(_))));
    }

    #[test]
    fn legacy_version_key() {
        let config =
            SinkConfig::from_json(r#"{"token": "t", "notion_api_version": "2022-06-28"}"#)
                .unwrap();
        assert_eq!(config.api_version, "2022-06-28");
    }

    #[test]
    fn data_source_wins_over_database() {
        let config = SinkConfig::new("t")
            .with_database_id("db1")
            .with_data_source_id("ds1");
        assert_eq!(
            config.container(),
            Some(ContainerRef::DataSource("ds1".into()))
        );

        let config = SinkConfig::new("t").with_database_id("db1");
        let container = config.container().unwrap();
        assert_eq!(container.schema_endpoint(), "/databases/db1");
        assert_eq!(container.query_endpoint(), "/databases/db1/query");
        assert_eq!(container.parent(), json!({"database_id": "db1"}));
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"token": "t", "database_id": "db1", "output_record_url": true}}"#
        )
        .unwrap();

        let config = SinkConfig::from_file(file.path()).unwrap();
        assert!(config.output_record_url);
        assert_eq!(config.container(), Some(ContainerRef::Database("db1".into())));
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SinkConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(SinkError::Config(_))));
    }

    #[test]
    fn backoff_doubles_until_attempts_run_out() {
        let retry = RetryConfig::new(5)
            .with_base_delay(Duration::from_millis(100))
            .without_jitter();

        assert_eq!(retry.backoff(0), None);
        assert_eq!(retry.backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(retry.backoff(2), Some(Duration::from_millis(200)));
        assert_eq!(retry.backoff(4), Some(Duration::from_millis(800)));
        assert_eq!(retry.backoff(5), None);
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryConfig::new(40)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        for failures in 1..40 {
            let wait = retry.backoff(failures).unwrap();
            assert!(wait <= Duration::from_millis(6250), "{:?}", wait);
        }
    }

    #[test]
    fn single_attempt_never_retries() {
        assert_eq!(RetryConfig::new(0).backoff(1), None);
        assert_eq!(RetryConfig::new(1).backoff(1), None);
    }
}
