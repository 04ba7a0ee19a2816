//! Engine configuration.
//!
//! [`EngineConfig`] is plain data: it can be built in code with the `with_*`
//! builders, loaded from a JSON file, and overlaid with `BACKLOG_*`
//! environment variables. Every field has a default, so a partial JSON file
//! is valid.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// How non-conflict 4xx responses are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorPolicy {
    /// Retry up to the item's attempt budget
    #[default]
    Retry,
    /// Exhaust the item immediately (408 and 429 are still retried)
    Terminal,
}

/// Retry budget and backoff shape for queued operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub default_max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Delay applied once an item runs out of attempts
    pub exhausted_delay_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the delay
    pub jitter_ratio: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            exhausted_delay_ms: 24 * 60 * 60 * 1_000,
            jitter_ratio: 0.1,
        }
    }
}

/// Sync run shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    pub request_timeout_ms: u64,
    /// `None` disables the auto-sync timer
    pub auto_sync_interval_secs: Option<u64>,
    pub reconnect_debounce_ms: u64,
    pub client_error_policy: ClientErrorPolicy,
    /// Entity types whose conflicts resolve server-wins automatically
    pub reference_entity_types: Vec<String>,
    pub reference_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay_ms: 1_000,
            request_timeout_ms: 30_000,
            auto_sync_interval_secs: Some(60),
            reconnect_debounce_ms: 2_000,
            client_error_policy: ClientErrorPolicy::Retry,
            reference_entity_types: vec!["reference".to_string()],
            reference_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl SyncConfig {
    pub fn is_reference_type(&self, entity_type: &str) -> bool {
        self.reference_entity_types
            .iter()
            .any(|candidate| candidate == entity_type)
    }
}

/// Connectivity probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
    /// Probes slower than this report `Poor` quality
    pub poor_latency_ms: u64,
    pub initially_online: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_timeout_ms: 5_000,
            poor_latency_ms: 1_500,
            initially_online: true,
        }
    }
}

/// Where the remote authority lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub probe_path: String,
    /// Entity type to collection path; unmapped types use the type itself
    pub routes: BTreeMap<String, String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            probe_path: "/health".to_string(),
            routes: BTreeMap::new(),
        }
    }
}

impl RemoteConfig {
    pub fn collection_for<'a>(&'a self, entity_type: &'a str) -> &'a str {
        self.routes
            .get(entity_type)
            .map_or(entity_type, String::as_str)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub monitor: MonitorConfig,
    pub remote: RemoteConfig,
}

impl EngineConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|error| Error::Config(format!("{}: {error}", path.as_ref().display())))?;
        Ok(config)
    }

    /// Overlay `BACKLOG_*` variables from the process environment
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay `BACKLOG_*` variables read through `lookup`
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| normalize_text_option(lookup(key));

        if let Some(url) = read("BACKLOG_REMOTE_URL") {
            self.remote.base_url = Some(url);
        }
        if let Some(value) = read("BACKLOG_BATCH_SIZE") {
            self.sync.batch_size = parse_env("BACKLOG_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read("BACKLOG_AUTO_SYNC_SECS") {
            let secs: u64 = parse_env("BACKLOG_AUTO_SYNC_SECS", &value)?;
            self.sync.auto_sync_interval_secs = (secs > 0).then_some(secs);
        }
        if let Some(value) = read("BACKLOG_MAX_ATTEMPTS") {
            self.queue.default_max_attempts = parse_env("BACKLOG_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read("BACKLOG_STRICT_CLIENT_ERRORS") {
            self.sync.client_error_policy = if parse_flag("BACKLOG_STRICT_CLIENT_ERRORS", &value)? {
                ClientErrorPolicy::Terminal
            } else {
                ClientErrorPolicy::Retry
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.queue.default_max_attempts == 0 {
            return Err(Error::Config(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.base_delay_ms > self.queue.max_delay_ms {
            return Err(Error::Config(
                "base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.queue.jitter_ratio) {
            return Err(Error::Config(
                "jitter_ratio must be between 0 and 1".to_string(),
            ));
        }
        if let Some(url) = &self.remote.base_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "remote base_url must include http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote.base_url = normalize_text_option(Some(url.into()));
        self
    }

    #[must_use]
    pub fn with_route(mut self, entity_type: impl Into<String>, collection: impl Into<String>) -> Self {
        self.remote.routes.insert(entity_type.into(), collection.into());
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.sync.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.sync.inter_batch_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.sync.request_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub const fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.sync.auto_sync_interval_secs = Some(interval.as_secs());
        self
    }

    /// Disable the auto-sync timer (manual sync only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync.auto_sync_interval_secs = None;
        self
    }

    #[must_use]
    pub const fn with_client_error_policy(mut self, policy: ClientErrorPolicy) -> Self {
        self.sync.client_error_policy = policy;
        self
    }

    #[must_use]
    pub fn with_reference_types<I, S>(mut self, entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync.reference_entity_types = entity_types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.queue.default_max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.queue.base_delay_ms = duration_ms(base);
        self.queue.max_delay_ms = duration_ms(max);
        self
    }

    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.queue.jitter_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_initially_online(mut self, online: bool) -> Self {
        self.monitor.initially_online = online;
        self
    }

    pub const fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.sync.inter_batch_delay_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.request_timeout_ms)
    }

    pub const fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.sync.reconnect_debounce_ms)
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.sync
            .auto_sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.probe_timeout_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {value}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.default_max_attempts, 3);
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.auto_sync_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"sync": {"batch_size": 4}, "remote": {"base_url": "https://api.example.com"}}"#)
                .unwrap();
        assert_eq!(config.sync.batch_size, 4);
        assert_eq!(config.sync.inter_batch_delay_ms, 1_000);
        assert_eq!(config.remote.probe_path, "/health");
    }

    #[test]
    fn from_json_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(Error::Config(_))
        ));

        std::fs::write(&path, r#"{"queue": {"default_max_attempts": 5}}"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.queue.default_max_attempts, 5);
    }

    #[test]
    fn env_overlay_applies_values() {
        let config = EngineConfig::default()
            .apply_env_from(env(&[
                ("BACKLOG_REMOTE_URL", "  https://api.example.com "),
                ("BACKLOG_BATCH_SIZE", "25"),
                ("BACKLOG_AUTO_SYNC_SECS", "0"),
                ("BACKLOG_MAX_ATTEMPTS", "7"),
                ("BACKLOG_STRICT_CLIENT_ERRORS", "true"),
            ]))
            .unwrap();

        assert_eq!(config.remote.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.auto_sync_interval(), None);
        assert_eq!(config.queue.default_max_attempts, 7);
        assert_eq!(config.sync.client_error_policy, ClientErrorPolicy::Terminal);
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let result = EngineConfig::default().apply_env_from(env(&[("BACKLOG_BATCH_SIZE", "many")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(EngineConfig::default().with_batch_size(0).validate().is_err());
        assert!(EngineConfig::default().with_max_attempts(0).validate().is_err());
        assert!(EngineConfig::default()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_remote_url("api.example.com")
            .validate()
            .is_err());
    }

    #[test]
    fn routes_fall_back_to_entity_type() {
        let config = EngineConfig::default().with_route("price", "prices");
        assert_eq!(config.remote.collection_for("price"), "prices");
        assert_eq!(config.remote.collection_for("market"), "market");
        assert!(config.sync.is_reference_type("reference"));
        assert!(!config.sync.is_reference_type("price"));
    }

    #[test]
    fn builders_replace_sync_settings() {
        let config = EngineConfig::default()
            .with_reference_types(["market", "currency"])
            .with_request_timeout(Duration::from_millis(1_500));

        assert!(config.sync.is_reference_type("currency"));
        assert!(!config.sync.is_reference_type("reference"));
        assert_eq!(config.request_timeout(), Duration::from_millis(1_500));
    }
}
