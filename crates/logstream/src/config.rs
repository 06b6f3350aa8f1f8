// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline tuning knobs.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::constants;
use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum time lines are held after the first line of a window.
    pub batch_window: Duration,
    /// Maximum number of lines folded into one batch.
    pub max_lines_per_batch: usize,
    /// Maximum message size of one batch; longer lines are truncated.
    pub max_batch_bytes: usize,
    /// Batches queued between accumulator and writer before the producer waits.
    pub pipe_capacity: usize,
    /// Maximum number of entries in one sink write.
    pub max_entries_per_write: usize,
    /// Maximum size of one sink write, per-entry overhead included.
    pub max_write_bytes: usize,
    /// Minimum spacing between two writes. Zero disables pacing.
    pub write_interval: Duration,
    /// Retention set on log groups the provisioner creates.
    pub retention_days: i32,
    /// Time the workload gets to stop before it is killed.
    pub stop_grace: Duration,
    /// Upper bound for workload cleanup after cancellation.
    pub cleanup_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_window: constants::DEFAULT_BATCH_WINDOW,
            max_lines_per_batch: constants::DEFAULT_MAX_LINES_PER_BATCH,
            max_batch_bytes: constants::MAX_EVENT_SIZE_BYTES,
            pipe_capacity: constants::DEFAULT_PIPE_CAPACITY,
            max_entries_per_write: constants::MAX_EVENTS_PER_WRITE,
            max_write_bytes: constants::MAX_WRITE_BYTES,
            write_interval: constants::DEFAULT_WRITE_INTERVAL,
            retention_days: constants::DEFAULT_RETENTION_DAYS,
            stop_grace: constants::DEFAULT_STOP_GRACE,
            cleanup_timeout: constants::DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `LOGSTREAM_*` environment variables.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            batch_window: env_millis("LOGSTREAM_BATCH_WINDOW_MS").unwrap_or(defaults.batch_window),
            max_lines_per_batch: env_parse("LOGSTREAM_MAX_LINES_PER_BATCH")
                .unwrap_or(defaults.max_lines_per_batch),
            pipe_capacity: env_parse("LOGSTREAM_PIPE_CAPACITY").unwrap_or(defaults.pipe_capacity),
            max_entries_per_write: env_parse("LOGSTREAM_MAX_ENTRIES_PER_WRITE")
                .unwrap_or(defaults.max_entries_per_write),
            write_interval: env_millis("LOGSTREAM_WRITE_INTERVAL_MS")
                .unwrap_or(defaults.write_interval),
            retention_days: env_parse("LOGSTREAM_RETENTION_DAYS")
                .unwrap_or(defaults.retention_days),
            cleanup_timeout: env_millis("LOGSTREAM_CLEANUP_TIMEOUT_MS")
                .unwrap_or(defaults.cleanup_timeout),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_window.is_zero() {
            return Err(ConfigError::Invalid(
                "batch window must be greater than 0".to_string(),
            ));
        }
        if self.max_lines_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "max lines per batch must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_bytes == 0 || self.max_batch_bytes > constants::MAX_EVENT_SIZE_BYTES {
            return Err(ConfigError::Invalid(format!(
                "max batch bytes must be between 1 and {}",
                constants::MAX_EVENT_SIZE_BYTES
            )));
        }
        if self.pipe_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipe capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_entries_per_write == 0
            || self.max_entries_per_write > constants::MAX_EVENTS_PER_WRITE
        {
            return Err(ConfigError::Invalid(format!(
                "max entries per write must be between 1 and {}",
                constants::MAX_EVENTS_PER_WRITE
            )));
        }
        if self.max_write_bytes < self.max_batch_bytes + constants::EVENT_OVERHEAD_BYTES {
            return Err(ConfigError::Invalid(
                "max write bytes must fit at least one full batch".to_string(),
            ));
        }
        if !constants::VALID_RETENTION_DAYS.contains(&self.retention_days) {
            return Err(ConfigError::Invalid(format!(
                "retention of {} days is not supported by CloudWatch Logs",
                self.retention_days
            )));
        }
        if self.cleanup_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "cleanup timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value '{raw}' for {key}");
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
