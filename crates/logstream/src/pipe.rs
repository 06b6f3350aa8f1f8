// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded single-producer/single-consumer conduit between the batch
//! accumulator and the sink writer.
//!
//! ```text
//!   BatchAccumulator ──send──> [ b1 | b2 | ... | bN ] ──recv──> SequencedSinkWriter
//!                      waits when full          None once closed and drained
//! ```
//!
//! Neither end is `Clone`, so there is exactly one producer and one consumer.
//! Batches are delivered in send order; nothing is dropped.

use tokio::sync::mpsc;

use crate::errors::PipelineError;
use crate::line::LogBatch;

/// Creates a pipe that holds at most `capacity` batches.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeSender, PipeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeSender { tx }, PipeReceiver { rx })
}

#[derive(Debug)]
pub struct PipeSender {
    tx: mpsc::Sender<LogBatch>,
}

impl PipeSender {
    /// Queues a batch, waiting for a free slot while the pipe is full.
    ///
    /// Fails only when the receiver is gone.
    pub async fn send(&self, batch: LogBatch) -> Result<(), PipelineError> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| PipelineError::PipeClosed)
    }

    /// Signals that no more batches will arrive.
    pub fn close(self) {
        drop(self);
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct PipeReceiver {
    rx: mpsc::Receiver<LogBatch>,
}

impl PipeReceiver {
    /// Next batch in send order. `None` once the sender closed and every
    /// queued batch was handed out.
    pub async fn recv(&mut self) -> Option<LogBatch> {
        self.rx.recv().await
    }

    /// Next batch if one is already queued.
    pub fn try_recv(&mut self) -> Option<LogBatch> {
        self.rx.try_recv().ok()
    }

    /// Refuses further sends. Batches already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
