use ingestcore::remote_delete::DEFAULT_RECEIVE_WINDOW_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds for the early-arrival cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyCachePolicy {
    pub max_keys: u64,
    pub max_items_per_key: usize,
    pub time_to_live_secs: u64,
}

impl Default for EarlyCachePolicy {
    fn default() -> Self {
        Self {
            max_keys: 100,
            max_items_per_key: 32,
            time_to_live_secs: 60 * 60,
        }
    }
}

impl EarlyCachePolicy {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Device id of this install; call messages addressed to other devices are dropped.
    pub local_device_id: u32,
    pub early_cache: EarlyCachePolicy,
    pub remote_delete_window_ms: u64,
    /// How long a sticker download may block before it is handed to the job queue.
    pub sticker_inline_budget_ms: u64,
    pub group_fetch_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            local_device_id: 1,
            early_cache: EarlyCachePolicy::default(),
            remote_delete_window_ms: DEFAULT_RECEIVE_WINDOW_MS,
            sticker_inline_budget_ms: 5_000,
            group_fetch_timeout_ms: 30_000,
        }
    }
}

impl IngestConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn sticker_inline_budget(&self) -> Duration {
        Duration::from_millis(self.sticker_inline_budget_ms)
    }

    pub fn group_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.group_fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = IngestConfig::from_json_str(r#"{"local_device_id": 3, "early_cache": {"max_keys": 5}}"#)
            .expect("valid config");
        assert_eq!(config.local_device_id, 3);
        assert_eq!(config.early_cache.max_keys, 5);
        assert_eq!(config.early_cache.max_items_per_key, 32);
        assert_eq!(config.remote_delete_window_ms, 24 * 60 * 60 * 1000);
    }
}
