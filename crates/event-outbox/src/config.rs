//! Configuration for outbound queues.

use crate::{OutboxError, OutboxResult};
use outbox_storage::StorageKeys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default byte budget for one batch submission.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 40_000;

/// Default number of buffered entries that forces a drain.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1;

/// Default cap on entries written to the durable record.
pub const DEFAULT_MAX_PERSISTED_ENTRIES: usize = 1_000;

/// Default request timeout for batch submissions.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default collector path for batch submissions.
pub const DEFAULT_POST_PATH: &str = "/com.snowplowanalytics.snowplow/tp2";

/// Collector path for single-event (beacon) submissions.
pub const BEACON_PATH: &str = "/i";

/// Default product identifier used in storage keys.
pub const DEFAULT_PRODUCT: &str = "snowplow";

/// Default tracker namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

/// How buffered events travel to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Several events per POST request with a JSON body.
    #[default]
    Batch,
    /// One event per GET request carrying a query string.
    Beacon,
}

impl TransportMode {
    /// Suffix that keeps each mode's durable record under its own key.
    pub fn storage_suffix(&self) -> &'static str {
        match self {
            TransportMode::Batch => StorageKeys::BATCH_SUFFIX,
            TransportMode::Beacon => StorageKeys::BEACON_SUFFIX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Batch => "batch",
            TransportMode::Beacon => "beacon",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "batch" | "post" => Ok(TransportMode::Batch),
            "beacon" | "get" => Ok(TransportMode::Beacon),
            other => Err(OutboxError::Config(format!(
                "unknown transport mode {:?} (expected batch or beacon)",
                other
            ))),
        }
    }
}

/// Outbound queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Product identifier, first component of the storage key.
    pub product: String,
    /// Tracker instance namespace.
    pub namespace: String,
    /// Preferred transport mode; downgraded to beacon when no batch
    /// transport is available.
    pub transport_mode: TransportMode,
    /// Byte budget for one batch submission.
    pub max_payload_bytes: usize,
    /// Requested flush threshold. Only honoured when the durable store is
    /// active and the queue runs in batch mode; otherwise 1.
    pub flush_threshold: usize,
    /// Persist the queue between process runs.
    pub use_durable_store: bool,
    /// Maximum number of entries written to the durable record.
    pub max_persisted_entries: usize,
    /// Timeout for one batch submission, in milliseconds.
    pub request_timeout_ms: u64,
    /// Collector path for batch submissions.
    pub post_path: String,
    /// Extra headers sent with every batch submission.
    pub custom_headers: BTreeMap<String, String>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            product: DEFAULT_PRODUCT.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            transport_mode: TransportMode::Batch,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            use_durable_store: true,
            max_persisted_entries: DEFAULT_MAX_PERSISTED_ENTRIES,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            post_path: DEFAULT_POST_PATH.to_string(),
            custom_headers: BTreeMap::new(),
        }
    }
}

impl OutboxConfig {
    /// Create a config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from a JSON file; environment variables are
    /// applied on top.
    pub fn load_from_file(path: &Path) -> OutboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: OutboxConfig = serde_json::from_str(&content)?;
        config.load_from_env();
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> OutboxResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `OUTBOX_*` overrides. Values that fail to parse are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(product) = lookup("OUTBOX_PRODUCT") {
            self.product = product;
        }
        if let Some(namespace) = lookup("OUTBOX_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(mode) = lookup("OUTBOX_TRANSPORT_MODE").and_then(|s| s.parse().ok()) {
            self.transport_mode = mode;
        }
        if let Some(bytes) = lookup("OUTBOX_MAX_PAYLOAD_BYTES").and_then(|s| s.parse().ok()) {
            self.max_payload_bytes = bytes;
        }
        if let Some(threshold) = lookup("OUTBOX_FLUSH_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.flush_threshold = threshold;
        }
        if let Some(enabled) = lookup("OUTBOX_USE_DURABLE_STORE").and_then(|s| parse_bool(&s)) {
            self.use_durable_store = enabled;
        }
        if let Some(ms) = lookup("OUTBOX_REQUEST_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.request_timeout_ms = ms;
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = OutboxConfig::default();
        assert_eq!(config.product, "snowplow");
        assert_eq!(config.transport_mode, TransportMode::Batch);
        assert_eq!(config.max_payload_bytes, 40_000);
        assert_eq!(config.flush_threshold, 1);
        assert!(config.use_durable_store);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.post_path, "/com.snowplowanalytics.snowplow/tp2");
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        std::fs::write(
            &path,
            r#"{"namespace": "web", "transport_mode": "beacon", "flush_threshold": 10}"#,
        )
        .unwrap();

        let config = OutboxConfig::load_from_file(&path).unwrap();
        assert_eq!(config.namespace, "web");
        assert_eq!(config.transport_mode, TransportMode::Beacon);
        assert_eq!(config.flush_threshold, 10);
        assert_eq!(config.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_config_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.json");

        let mut config = OutboxConfig::default();
        config.namespace = "saved".to_string();
        config
            .custom_headers
            .insert("X-Tenant".to_string(), "acme".to_string());
        config.save(&path).unwrap();

        let loaded: OutboxConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("OUTBOX_NAMESPACE", "from-env"),
            ("OUTBOX_TRANSPORT_MODE", "GET"),
            ("OUTBOX_MAX_PAYLOAD_BYTES", "1000"),
            ("OUTBOX_USE_DURABLE_STORE", "off"),
            ("OUTBOX_FLUSH_THRESHOLD", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = OutboxConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.namespace, "from-env");
        assert_eq!(config.transport_mode, TransportMode::Beacon);
        assert_eq!(config.max_payload_bytes, 1000);
        assert!(!config.use_durable_store);
        assert_eq!(config.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    }

    #[test]
    fn test_transport_mode_parsing() {
        assert_eq!("batch".parse::<TransportMode>().unwrap(), TransportMode::Batch);
        assert_eq!("POST".parse::<TransportMode>().unwrap(), TransportMode::Batch);
        assert_eq!("beacon".parse::<TransportMode>().unwrap(), TransportMode::Beacon);
        assert!("carrier-pigeon".parse::<TransportMode>().is_err());
    }

    #[test]
    fn test_storage_suffixes_differ() {
        assert_eq!(TransportMode::Batch.storage_suffix(), "post2");
        assert_eq!(TransportMode::Beacon.storage_suffix(), "get");
    }
}
