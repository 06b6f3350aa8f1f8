// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::line::{Destination, OrderingToken};

/// Errors reported by a sink or a destination provisioner.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The ordering token presented with the write was not the one the sink
    /// expected. `expected` is the token the sink wants next, `None` when the
    /// destination has never been written to.
    #[error("stale ordering token, sink expects {expected:?}")]
    StaleToken { expected: Option<OrderingToken> },

    /// The sink already stored this exact payload.
    #[error("entries were already accepted, sink expects {expected:?}")]
    AlreadyAccepted { expected: Option<OrderingToken> },

    #[error("request rejected by sink: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("sink unreachable: {0}")]
    Transport(String),

    #[error("malformed sink response: {0}")]
    Malformed(String),
}

/// Errors reading from a [`crate::source::LineSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read line: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`crate::workload::WorkloadController`].
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("workload operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
}

/// Errors that abort the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to provision {destination}: {source}")]
    Provision {
        destination: Destination,
        #[source]
        source: SinkError,
    },

    #[error("sink write failed: {0}")]
    Sink(#[source] SinkError),

    #[error("sink write failed after retrying with the expected token: {0}")]
    RetryExhausted(#[source] SinkError),

    #[error("line source failed: {0}")]
    Source(#[from] SourceError),

    #[error("workload failed: {0}")]
    Workload(#[from] WorkloadError),

    #[error("pipe closed by the consumer")]
    PipeClosed,

    #[error("pipeline task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_lists_every_key() {
        let error = ConfigError::Missing(vec![
            "LOGSTREAM_GROUP".to_string(),
            "LOGSTREAM_STREAM".to_string(),
        ]);
        assert_eq!(
            error.to_string(),
            "Missing required configuration: LOGSTREAM_GROUP, LOGSTREAM_STREAM"
        );
    }

    #[test]
    fn test_retry_exhausted_keeps_sink_error_as_source() {
        let error = PipelineError::RetryExhausted(SinkError::StaleToken {
            expected: Some(OrderingToken::from("abc")),
        });
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("stale ordering token, sink expects Some(OrderingToken(\"abc\"))")
        );
    }

    #[test]
    fn test_provision_error_names_destination() {
        let error = PipelineError::Provision {
            destination: Destination::new("group", "stream"),
            source: SinkError::Transport("connection refused".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "failed to provision group/stream: sink unreachable: connection refused"
        );
    }
}
