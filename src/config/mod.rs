pub mod polling;
mod raw;

use std::path::{Path, PathBuf};
use std::time::Duration;

use duration_string::DurationString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::instrument;

use self::polling::PollingConfig;
use self::raw::RawConfig;

pub use self::raw::ConfigParseError;

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: Option<String>,
    pub timeout: Option<Duration>,
    pub polling: PollingConfig,
    pub logs: LogsConfig,
    pub job: JobConfig,
}

#[derive(Debug, Clone)]
pub struct LogsConfig {
    /// How long the log copy may keep draining once the exit code is known
    pub drain_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name_suffix_length: usize,
    pub ttl_after_finished: Duration,
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Cannot read config file '{0}': {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Cannot parse config file '{0}': {1}")]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("Invalid config file '{0}': {1}")]
    Invalid(PathBuf, #[source] ConfigParseError),
}

impl Config {
    #[instrument("load_config")]
    pub async fn new_from_file(path: &Path) -> Result<Config, ConfigLoadError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigLoadError::Read(path.to_path_buf(), e))?;
        let raw: RawConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigLoadError::Parse(path.to_path_buf(), e))?;
        Config::try_from(raw).map_err(|e| ConfigLoadError::Invalid(path.to_path_buf(), e))
    }
}

impl Default for Config {
    fn default() -> Self {
        let raw = RawConfig::default();
        Config {
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
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    DurationString::from_string(value.to_string())
        .map(Into::into)
        .map_err(|_| format!("invalid duration '{value}', expected e.g. 90s, 5m or 1h"))
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_duration(&value).map_err(serde::de::Error::custom)
}

pub(crate) fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| parse_duration(&value).map_err(serde::de::Error::custom))
        .transpose()
}
