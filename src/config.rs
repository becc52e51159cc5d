//! Configuration for the sync engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Where and how the engine talks to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root URL of the document store, e.g. `https://example.firebaseio.com`.
    pub base_url: String,
    /// Collection holding the task records.
    pub collection: String,
    /// Per-request transport timeout. Requests are never retried.
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must be set"));
        }
        if self.collection.is_empty() || self.collection.contains('/') {
            return Err(ConfigError::Invalid(
                "collection must be a single non-empty path segment",
            ));
        }
        Ok(())
    }

    /// Path of the whole collection document.
    pub fn collection_path(&self) -> String {
        format!("{}.json", self.collection)
    }

    /// Path of a single record keyed by its wire identifier.
    pub fn record_path(&self, key: &str) -> String {
        format!("{}/{}.json", self.collection, key)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            collection: "tasks".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = SyncConfig::new("https://tasks.example.com")
            .with_collection("todo")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.base_url, "https://tasks.example.com");
        assert_eq!(config.collection_path(), "todo.json");
        assert_eq!(config.record_path("ABC"), "todo/ABC.json");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn json_defaults() {
        let config = SyncConfig::from_json(r#"{"base_url":"https://x.example"}"#).unwrap();
        assert_eq!(config.collection, "tasks");
        assert_eq!(config.timeout, Duration::from_secs(30));

        let config =
            SyncConfig::from_json(r#"{"base_url":"https://x.example","timeout_secs":2.5}"#)
                .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn validation() {
        assert!(matches!(
            SyncConfig::from_json("{}"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_json(r#"{"base_url":"u","collection":"a/b"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_json(r#"{"base_url":"u","timeout_secs":-1}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            SyncConfig::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
