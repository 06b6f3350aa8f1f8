// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sequenced writes of batches to the sink.
//!
//! ```text
//!   PipeReceiver
//!       │  recv, then take whatever else is already queued
//!       v
//!   ┌──────────────┐
//!   │  Entries     │ (one per batch, non-decreasing timestamps)
//!   └──────┬───────┘
//!          │  token from the previous write
//!          v
//!   ┌──────────────┐    stale token    ┌───────────────────────┐
//!   │ put_entries  │ ────────────────> │ resubmit once with    │
//!   └──────┬───────┘                   │ the expected token    │
//!          │ next token                └───────────────────────┘
//!          v
//!   stored for the next write
//! ```
//!
//! The writer owns the ordering token, so writes to a destination are
//! strictly sequential. It never watches the cancellation token: it stops
//! only once the pipe is closed and drained, so a write that started always
//! completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, SinkError};
use crate::line::{now_millis, Destination, LogBatch, OrderingToken, SinkEntry};
use crate::pipe::PipeReceiver;
use crate::sink::{DestinationProvisioner, PutOutcome, Sink};

/// What the consumer side delivered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriterReport {
    pub writes: usize,
    pub entries: usize,
    pub lines: usize,
    pub token_retries: usize,
    /// Entries of accepted writes that the sink did not store.
    pub rejected: Vec<RejectedEntries>,
}

/// Entries of one write that the sink accepted the request for but dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntries {
    pub destination: Destination,
    /// 1-based number of the write.
    pub write: usize,
    /// Positions within that write.
    pub indices: Vec<usize>,
}

pub struct SequencedSinkWriter {
    destination: Destination,
    sink: Arc<dyn Sink>,
    provisioner: Arc<dyn DestinationProvisioner>,
    retention_days: i32,
    max_entries: usize,
    max_bytes: usize,
    write_interval: Duration,
    token: Option<OrderingToken>,
    // Batch taken off the pipe that did not fit into the previous write.
    held: Option<LogBatch>,
    last_write: Option<Instant>,
    last_timestamp_ms: i64,
    report: WriterReport,
}

impl SequencedSinkWriter {
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        destination: Destination,
        sink: Arc<dyn Sink>,
        provisioner: Arc<dyn DestinationProvisioner>,
    ) -> Self {
        Self {
            destination,
            sink,
            provisioner,
            retention_days: config.retention_days,
            max_entries: config.max_entries_per_write.max(1),
            max_bytes: config.max_write_bytes,
            write_interval: config.write_interval,
            token: None,
            held: None,
            last_write: None,
            last_timestamp_ms: 0,
            report: WriterReport::default(),
        }
    }

    /// Provisions the destination, then writes every batch the pipe delivers
    /// until it is closed and drained.
    ///
    /// On a fatal error the pipe is closed so the producer stops as well.
    pub async fn run(mut self, mut pipe: PipeReceiver) -> Result<WriterReport, PipelineError> {
        if let Err(source) = self
            .provisioner
            .ensure_exists(&self.destination, self.retention_days)
            .await
        {
            error!(
                "WRITER | Failed to provision {}: {source}",
                self.destination
            );
            pipe.close();
            return Err(PipelineError::Provision {
                destination: self.destination,
                source,
            });
        }
        debug!("WRITER | Destination {} is ready", self.destination);

        while let Some(batches) = self.next_write(&mut pipe).await {
            if let Err(e) = self.push(batches).await {
                error!("WRITER | Aborting writes to {}: {e}", self.destination);
                pipe.close();
                return Err(e);
            }
        }

        info!(
            "WRITER | Logged all events to {}: {} lines in {} writes",
            self.destination, self.report.lines, self.report.writes
        );
        Ok(self.report)
    }

    async fn next_write(&mut self, pipe: &mut PipeReceiver) -> Option<Vec<LogBatch>> {
        let first = match self.held.take() {
            Some(batch) => batch,
            None => pipe.recv().await?,
        };

        let mut size = first.entry_size();
        let mut batches = vec![first];
        while batches.len() < self.max_entries {
            let Some(next) = pipe.try_recv() else {
                break;
            };
            if size + next.entry_size() > self.max_bytes {
                self.held = Some(next);
                break;
            }
            size += next.entry_size();
            batches.push(next);
        }
        Some(batches)
    }

    async fn push(&mut self, batches: Vec<LogBatch>) -> Result<(), PipelineError> {
        self.pace().await;

        let lines: usize = batches.iter().map(LogBatch::len).sum();
        let entries = self.entries(batches);

        let result = self
            .sink
            .put_entries(&self.destination, &entries, self.token.as_ref())
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(SinkError::StaleToken { expected }) => {
                warn!(
                    "WRITER | Caught stale ordering token, retrying with expected token {}",
                    token_label(expected.as_ref())
                );
                self.report.token_retries += 1;
                match self
                    .sink
                    .put_entries(&self.destination, &entries, expected.as_ref())
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(SinkError::AlreadyAccepted { expected }) => PutOutcome::accepted(expected),
                    Err(e) => return Err(PipelineError::RetryExhausted(e)),
                }
            }
            Err(SinkError::AlreadyAccepted { expected }) => {
                warn!(
                    "WRITER | Entries were already accepted, continuing with token {}",
                    token_label(expected.as_ref())
                );
                PutOutcome::accepted(expected)
            }
            Err(e) => return Err(PipelineError::Sink(e)),
        };

        self.last_write = Some(Instant::now());
        self.token = outcome.next_token;
        self.report.writes += 1;
        if !outcome.rejected.is_empty() {
            warn!(
                "WRITER | {} of {} entries in write {} were not stored by {}",
                outcome.rejected.len(),
                entries.len(),
                self.report.writes,
                self.destination
            );
            self.report.rejected.push(RejectedEntries {
                destination: self.destination.clone(),
                write: self.report.writes,
                indices: outcome.rejected,
            });
        }
        self.report.entries += entries.len();
        self.report.lines += lines;
        debug!(
            "WRITER | Wrote {} entries ({lines} lines) to {}",
            entries.len(),
            self.destination
        );
        Ok(())
    }

    async fn pace(&self) {
        if self.write_interval.is_zero() {
            return;
        }
        if let Some(last_write) = self.last_write {
            sleep_until(last_write + self.write_interval).await;
        }
    }

    // The sink requires chronological entries within a write.
    fn entries(&mut self, batches: Vec<LogBatch>) -> Vec<SinkEntry> {
        batches
            .into_iter()
            .map(|batch| {
                let timestamp = now_millis().max(self.last_timestamp_ms);
                self.last_timestamp_ms = timestamp;
                batch.into_entry(timestamp)
            })
            .collect()
    }
}

fn token_label(token: Option<&OrderingToken>) -> &str {
    token.map_or("<none>", OrderingToken::as_str)
}
