//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::network::NetworkPolicy;
use crate::retry::RetryConfig;

/// Sync engine configuration, loadable from JSON.
///
/// Every field has a default so partial documents are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Which network classes non-manual triggers may run on.
    pub network_policy: NetworkPolicy,
    /// Periodic sync interval in seconds. `None` disables the timer.
    pub periodic_interval_secs: Option<u64>,
    /// Quiet period after a local save before a sync fires.
    pub debounce_ms: u64,
    /// Delay before `Success`/`Error` settle back to `Idle`. `None` keeps them.
    pub settle_delay_ms: Option<u64>,
    /// Total attempts for a retried call, first try included.
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            network_policy: NetworkPolicy::Any,
            periodic_interval_secs: Some(300),
            debounce_ms: 2_000,
            settle_delay_ms: Some(3_000),
            retry_max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn periodic_interval(&self) -> Option<Duration> {
        self.periodic_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_delay(&self) -> Option<Duration> {
        self.settle_delay_ms.map(Duration::from_millis)
    }

    /// Retry policy derived from the `retry_*` fields.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retry_max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.periodic_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.debounce(), Duration::from_secs(2));
        assert_eq!(config.settle_delay(), Some(Duration::from_secs(3)));

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{ "network_policy": "wifi_only", "periodic_interval_secs": null }"#,
        )
        .unwrap();

        assert_eq!(config.network_policy, NetworkPolicy::WifiOnly);
        assert_eq!(config.periodic_interval(), None);
        assert_eq!(config.debounce_ms, 2_000);
    }
}
