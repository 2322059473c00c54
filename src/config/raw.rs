use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::polling::PollingConfig;
use super::{Config, JobConfig, LogsConfig, deserialize_duration, deserialize_optional_duration};
use crate::job::spec::MAX_NAME_SUFFIX_LENGTH;

pub(crate) const MIN_NAME_SUFFIX_LENGTH: usize = 4;

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(super) struct RawConfig {
    /// Kubernetes namespace jobs are created in
    #[serde(default)]
    pub(super) namespace: Option<String>,

    /// Overall deadline for a run
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub(super) timeout: Option<Duration>,

    #[serde(default)]
    pub(super) polling: PollingConfig,

    #[serde(default)]
    pub(super) logs: RawLogsConfig,

    #[serde(default)]
    pub(super) job: RawJobConfig,
}

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
pub(super) struct RawLogsConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_drain_grace"
    )]
    pub(super) drain_grace: Duration,
}

impl Default for RawLogsConfig {
    fn default() -> Self {
        Self {
            drain_grace: default_drain_grace(),
        }
    }
}

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
pub(super) struct RawJobConfig {
    #[serde(default = "default_name_suffix_length")]
    pub(super) name_suffix_length: usize,

    /// Kubernetes garbage-collects finished jobs after this delay even if
    /// the explicit removal never happened
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_ttl_after_finished"
    )]
    pub(super) ttl_after_finished: Duration,
}

impl Default for RawJobConfig {
    fn default() -> Self {
        Self {
            name_suffix_length: default_name_suffix_length(),
            ttl_after_finished: default_ttl_after_finished(),
        }
    }
}

const fn default_drain_grace() -> Duration {
    Duration::from_secs(2)
}
const fn default_name_suffix_length() -> usize {
    8
}
const fn default_ttl_after_finished() -> Duration {
    Duration::from_secs(600)
}

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("job.name_suffix_length must be at least {min}, got {0}", min = MIN_NAME_SUFFIX_LENGTH)]
    NameSuffixTooShort(usize),

    #[error("job.name_suffix_length must be at most {max}, got {0}", max = MAX_NAME_SUFFIX_LENGTH)]
    NameSuffixTooLong(usize),

    #[error("polling.poll_interval must not be zero")]
    ZeroPollInterval,

    #[error(
        "polling.error_wait ({error_wait:?}) must not be shorter than polling.poll_interval ({poll_interval:?})"
    )]
    ErrorWaitTooShort {
        poll_interval: Duration,
        error_wait: Duration,
    },

    #[error("namespace must not be empty")]
    EmptyNamespace,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigParseError;
    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        if raw.job.name_suffix_length < MIN_NAME_SUFFIX_LENGTH {
            return Err(ConfigParseError::NameSuffixTooShort(
                raw.job.name_suffix_length,
            ));
        }
        if raw.job.name_suffix_length > MAX_NAME_SUFFIX_LENGTH {
            return Err(ConfigParseError::NameSuffixTooLong(
                raw.job.name_suffix_length,
            ));
        }
        if raw.polling.poll_interval.is_zero() {
            return Err(ConfigParseError::ZeroPollInterval);
        }
        if raw.polling.error_wait < raw.polling.poll_interval {
            return Err(ConfigParseError::ErrorWaitTooShort {
                poll_interval: raw.polling.poll_interval,
                error_wait: raw.polling.error_wait,
            });
        }
        if raw.namespace.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigParseError::EmptyNamespace);
        }

        Ok(Config {
            namespace: raw.namespace,
            timeout: raw.timeout,
            polling: raw.polling,
            logs: LogsConfig {
                drain_grace: raw.logs.drain_grace,
            },
            job: JobConfig {
                name_suffix_length: raw.job.name_suffix_length,
                ttl_after_finished: raw.job.ttl_after_finished,
            },
        })
    }
}
