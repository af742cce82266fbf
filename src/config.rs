//! Runtime configuration for the background sync pipeline.
//!
//! `SyncConfig` can be deserialized from JSON (missing keys take their defaults) or read from
//! the process environment. Build metadata (`app_version`, `schema_version`, `data_epoch`) is
//! attached to install telemetry and folded into versioned API cache keys.

use crate::backoff::Backoff;
use crate::error::{BuildError, ConfigError};
use crate::queue::Retention;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const ENV_APP_VERSION: &str = "REFRESH_SYNC_APP_VERSION";
pub const ENV_SCHEMA_VERSION: &str = "REFRESH_SYNC_SCHEMA_VERSION";
pub const ENV_DATA_EPOCH: &str = "REFRESH_SYNC_DATA_EPOCH";
pub const ENV_FORCE_UPDATE: &str = "REFRESH_SYNC_FORCE_UPDATE";

/// Settings shared by the controller, the queue and the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Queue label used in telemetry and logs.
    pub queue_name: String,
    /// Replay ceiling per entry per drain.
    pub max_attempts: usize,
    /// Base of the exponential in-drain backoff; 0 retries immediately.
    pub backoff_base_ms: u64,
    /// Entries older than this are discarded when popped.
    pub max_retention_minutes: u64,
    pub app_version: String,
    pub schema_version: String,
    pub data_epoch: String,
    /// Activate a new worker immediately on install instead of waiting for old clients.
    pub force_update: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_name: "refresh-queue".to_string(),
            max_attempts: 3,
            backoff_base_ms: 200,
            max_retention_minutes: 60 * 24,
            app_version: "development".to_string(),
            schema_version: "unknown".to_string(),
            data_epoch: "unknown".to_string(),
            force_update: false,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the `REFRESH_SYNC_*` build metadata variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    ///
    /// Empty strings fall back to the default. `force_update` accepts only `"true"` and
    /// `"false"`; anything else keeps the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            app_version: non_empty(lookup(ENV_APP_VERSION), defaults.app_version.clone()),
            schema_version: non_empty(lookup(ENV_SCHEMA_VERSION), defaults.schema_version.clone()),
            data_epoch: non_empty(lookup(ENV_DATA_EPOCH), defaults.data_epoch.clone()),
            force_update: parse_flag(lookup(ENV_FORCE_UPDATE), defaults.force_update),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        if self.queue_name.trim().is_empty() {
            return Err(BuildError::EmptyQueueName);
        }
        Ok(())
    }

    /// Exponential backoff from `backoff_base_ms`, or no delay when the base is zero.
    pub fn backoff(&self) -> Backoff {
        match self.backoff_base_ms {
            0 => Backoff::none(),
            ms => Backoff::exponential(Duration::from_millis(ms)),
        }
    }

    pub fn retention(&self) -> Retention {
        Retention::new(Duration::from_secs(self.max_retention_minutes.saturating_mul(60)))
    }

    /// Build metadata attached to install telemetry.
    pub fn telemetry_context(&self) -> Value {
        json!({
            "appVersion": self.app_version,
            "schemaVersion": self.schema_version,
            "dataEpoch": self.data_epoch,
        })
    }
}

fn non_empty(value: Option<String>, fallback: String) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or(fallback)
}

fn parse_flag(value: Option<String>, fallback: bool) -> bool {
    match value.as_deref() {
        Some("true") => true,
        Some("false") => false,
        _ => fallback,
    }
}
