// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fakes for unit tests.

#![cfg(test)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::line::{Destination, LogBatch, LogLine, OrderingToken, SinkEntry};
use crate::sink::{DestinationProvisioner, PutOutcome, Sink};

pub(crate) fn batch(lines: &[&str]) -> LogBatch {
    LogBatch::new(lines.iter().map(|line| LogLine::new(*line)).collect())
        .expect("test batches are never empty")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedWrite {
    pub messages: Vec<String>,
    pub timestamps: Vec<i64>,
    pub token: Option<String>,
}

/// Sink answering writes from a script, then with `token-<n>` once the script
/// runs out.
#[derive(Default)]
pub(crate) struct ScriptedSink {
    responses: Mutex<VecDeque<Result<PutOutcome, SinkError>>>,
    writes: Mutex<Vec<RecordedWrite>>,
    latency: Duration,
}

impl ScriptedSink {
    pub(crate) fn with_responses(
        responses: Vec<Result<PutOutcome, SinkError>>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn put_entries(
        &self,
        _destination: &Destination,
        entries: &[SinkEntry],
        token: Option<&OrderingToken>,
    ) -> Result<PutOutcome, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let count = {
            let mut writes = self.writes.lock().expect("lock poisoned");
            writes.push(RecordedWrite {
                messages: entries.iter().map(|e| e.message.clone()).collect(),
                timestamps: entries.iter().map(|e| e.timestamp_ms).collect(),
                token: token.map(|t| t.as_str().to_string()),
            });
            writes.len()
        };

        self.responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PutOutcome::accepted(Some(OrderingToken::new(format!(
                    "token-{count}"
                )))))
            })
    }
}

#[derive(Default)]
pub(crate) struct RecordingProvisioner {
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingProvisioner {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationProvisioner for RecordingProvisioner {
    async fn ensure_exists(
        &self,
        _destination: &Destination,
        _retention_days: i32,
    ) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SinkError::Rejected {
                code: "AccessDeniedException".to_string(),
                message: "not allowed".to_string(),
            });
        }
        Ok(())
    }
}
