//! Engine configuration.
//!
//! Grounded on `fiddler::config::Config`: a struct parsed from YAML via `serde_yaml`,
//! with a `FromStr` impl and literal defaults for every value the rest of the engine
//! treats as "configured": batch ceiling, Memory TTL, retry policy, poll cadence, and
//! channel bound.

use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid duration in config: {0}")]
    Duration(String),
}

fn default_max_batch_size() -> usize {
    32
}

fn default_workflow_timeout() -> String {
    "10m".to_string()
}

fn default_activity_max_attempts() -> u32 {
    3
}

fn default_stream_poll_interval() -> String {
    "1ms".to_string()
}

fn default_stream_poll_timeout() -> String {
    "60s".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

/// As-parsed configuration, with durations still in their human-readable string form
/// (mirroring `fiddler::config::Config`'s separation from `ParsedConfig`).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_workflow_timeout")]
    pub workflow_timeout: String,
    #[serde(default = "default_activity_max_attempts")]
    pub activity_max_attempts: u32,
    #[serde(default = "default_stream_poll_interval")]
    pub stream_poll_interval: String,
    #[serde(default = "default_stream_poll_timeout")]
    pub stream_poll_timeout: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_batch_size: default_max_batch_size(),
            workflow_timeout: default_workflow_timeout(),
            activity_max_attempts: default_activity_max_attempts(),
            stream_poll_interval: default_stream_poll_interval(),
            stream_poll_timeout: default_stream_poll_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(s)?)
    }
}

impl Config {
    /// Parses the human-readable durations into the [`EngineConfig`] the rest of the
    /// engine consumes.
    pub fn parsed(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            max_batch_size: self.max_batch_size,
            workflow_timeout: parse_duration::parse(&self.workflow_timeout)
                .map_err(|e| ConfigError::Duration(e.to_string()))?,
            activity_max_attempts: self.activity_max_attempts,
            stream_poll_interval: parse_duration::parse(&self.stream_poll_interval)
                .map_err(|e| ConfigError::Duration(e.to_string()))?,
            stream_poll_timeout: parse_duration::parse(&self.stream_poll_timeout)
                .map_err(|e| ConfigError::Duration(e.to_string()))?,
            channel_capacity: self.channel_capacity,
        })
    }
}

/// The operational knobs consumed directly by the engine's runtime pieces.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_batch_size: usize,
    /// Used both as the per-workflow max-duration (§5) and the Memory Store TTL (§4.3).
    pub workflow_timeout: Duration,
    pub activity_max_attempts: u32,
    pub stream_poll_interval: Duration,
    pub stream_poll_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default()
            .parsed()
            .expect("literal default durations always parse")
    }
}
