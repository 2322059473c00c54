use std::time::Duration;

use serde::Deserialize;

use super::deserialize_duration;

/// How the task watcher paces its polls against the cluster.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct PollingConfig {
    /// Delay between two polls while tasks are still running.
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,

    /// Upper bound of the backoff applied after failed polls.
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_error_wait"
    )]
    pub error_wait: Duration,
}

impl PollingConfig {
    /// Backoff to apply after `consecutive_errors` failed polls in a row.
    ///
    /// Starts at `poll_interval`, doubles on each failure and never exceeds
    /// `error_wait`.
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        self.poll_interval
            .saturating_mul(1u32 << exponent)
            .min(self.error_wait)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            error_wait: default_error_wait(),
        }
    }
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}
const fn default_error_wait() -> Duration {
    Duration::from_secs(10)
}
