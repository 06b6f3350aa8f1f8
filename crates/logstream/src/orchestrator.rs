// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs one workload and ships its output to one destination.
//!
//! ```text
//!               ┌────────────┐   batches   ┌────────────┐
//!  workload ───>│  producer  │ ──(pipe)──> │   writer   │ ───> sink
//!   output      └─────┬──────┘             └────────────┘
//!                     │ stop
//!   cancel ───────────┤
//!                     │
//!               ┌─────┴──────┐
//!  exit ───────>│ supervisor │ ───> stop and remove workload
//!               └────────────┘
//! ```
//!
//! Cancellation reaches the producer and the supervisor only. The producer
//! flushes its open window and closes the pipe, the writer drains what is
//! queued, and the supervisor cleans up the workload under its own timeout.
//! A fatal error on either side stops the whole pipeline the same way.

use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::{AccumulatorReport, BatchAccumulator};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::line::Destination;
use crate::pipe::pipe;
use crate::sink::{DestinationProvisioner, Sink};
use crate::workload::{
    RunningWorkload, WorkloadController, WorkloadExit, WorkloadHandle, WorkloadSpec,
};
use crate::writer::{SequencedSinkWriter, WriterReport};

/// Lifecycle of a pipeline run.
///
/// `Streaming` moves to `Draining` once the producer closed the pipe, or to
/// `Cleanup` when the run is cancelled before the workload exited. `Done` is
/// published exactly once, after every task finished.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Streaming,
    Draining,
    Cleanup,
    Done,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub accumulator: AccumulatorReport,
    pub writer: WriterReport,
    /// How the workload ended, if the exit was observed.
    pub exit: Option<WorkloadExit>,
    pub cancelled: bool,
    pub cleaned_up: bool,
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    controller: Arc<dyn WorkloadController>,
    sink: Arc<dyn Sink>,
    provisioner: Arc<dyn DestinationProvisioner>,
}

/// A pipeline running in the background.
pub struct PipelineHandle {
    state: watch::Receiver<PipelineState>,
    cancel: CancellationToken,
    completion: oneshot::Receiver<Result<PipelineReport, PipelineError>>,
}

impl PipelineHandle {
    #[must_use]
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once, when the pipeline is done.
    pub async fn completion(self) -> Result<PipelineReport, PipelineError> {
        self.completion
            .await
            .map_err(|_| PipelineError::Join("pipeline task ended without a result".to_string()))?
    }
}

#[derive(Debug, Default)]
struct Supervision {
    exit: Option<WorkloadExit>,
    cleaned_up: bool,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        controller: Arc<dyn WorkloadController>,
        sink: Arc<dyn Sink>,
        provisioner: Arc<dyn DestinationProvisioner>,
    ) -> Self {
        Self {
            config,
            controller,
            sink,
            provisioner,
        }
    }

    /// Runs the pipeline to completion on the current task.
    pub async fn run(
        &self,
        spec: &WorkloadSpec,
        destination: Destination,
        cancel: CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        let (state, _) = watch::channel(PipelineState::Streaming);
        self.execute(spec, destination, cancel, Arc::new(state))
            .await
    }

    /// Spawns the pipeline and returns a handle to observe and cancel it.
    #[must_use]
    pub fn start(
        &self,
        spec: WorkloadSpec,
        destination: Destination,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let (state_tx, state_rx) = watch::channel(PipelineState::Streaming);
        let (completion_tx, completion_rx) = oneshot::channel();
        let orchestrator = self.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let result = orchestrator
                .execute(&spec, destination, task_cancel, Arc::new(state_tx))
                .await;
            // Nobody is waiting when the handle was dropped.
            let _ = completion_tx.send(result);
        });

        PipelineHandle {
            state: state_rx,
            cancel,
            completion: completion_rx,
        }
    }

    async fn execute(
        &self,
        spec: &WorkloadSpec,
        destination: Destination,
        cancel: CancellationToken,
        state: Arc<watch::Sender<PipelineState>>,
    ) -> Result<PipelineReport, PipelineError> {
        let result = self.stream(spec, destination, &cancel, &state).await;
        state.send_replace(PipelineState::Done);

        match &result {
            Ok(report) => info!(
                "PIPELINE | Done: {} lines shipped in {} writes",
                report.writer.lines, report.writer.writes
            ),
            Err(e) => error!("PIPELINE | Failed: {e}"),
        }
        result
    }

    async fn stream(
        &self,
        spec: &WorkloadSpec,
        destination: Destination,
        cancel: &CancellationToken,
        state: &Arc<watch::Sender<PipelineState>>,
    ) -> Result<PipelineReport, PipelineError> {
        info!(
            "PIPELINE | Starting `{}` in {} for {destination}",
            spec.command, spec.image
        );
        // Dropping a pending start abandons whatever command it was running.
        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            started = self.controller.start(spec) => Some(started?),
        };
        let Some(RunningWorkload {
            handle,
            mut lines,
            exit,
        }) = started
        else {
            warn!("PIPELINE | Cancelled before the workload started");
            return Ok(PipelineReport {
                cancelled: true,
                ..Default::default()
            });
        };
        info!("PIPELINE | Workload {handle} started");

        // Stops producer and supervisor on cancellation or on a fatal error.
        let stop = cancel.child_token();
        let (sender, receiver) = pipe(self.config.pipe_capacity);

        let accumulator = BatchAccumulator::new(&self.config);
        let producer_stop = stop.clone();
        let producer_state = Arc::clone(state);
        let producer = tokio::spawn(async move {
            let result = accumulator
                .run(lines.as_mut(), sender, producer_stop)
                .await;
            producer_state.send_if_modified(|state| advance(state, PipelineState::Draining));
            result
        });

        let writer = SequencedSinkWriter::new(
            &self.config,
            destination,
            Arc::clone(&self.sink),
            Arc::clone(&self.provisioner),
        );
        let writer = tokio::spawn(writer.run(receiver));

        let supervisor = tokio::spawn(supervise(
            Arc::clone(&self.controller),
            handle,
            exit,
            stop.clone(),
            Arc::clone(state),
            self.config.stop_grace,
            self.config.cleanup_timeout,
        ));

        let writer_result = join(writer).await;
        if writer_result.is_err() {
            stop.cancel();
        }
        let producer_result = join(producer).await;
        if producer_result.is_err() {
            stop.cancel();
        }
        let supervision = join(supervisor).await?;

        let writer_report = writer_result?;
        let accumulator_report = producer_result?;
        Ok(PipelineReport {
            accumulator: accumulator_report,
            writer: writer_report,
            exit: supervision.exit,
            cancelled: cancel.is_cancelled(),
            cleaned_up: supervision.cleaned_up,
        })
    }
}

// `Draining` only follows `Streaming`; `Cleanup` may interrupt either.
fn advance(state: &mut PipelineState, next: PipelineState) -> bool {
    let allowed = match next {
        PipelineState::Draining => *state == PipelineState::Streaming,
        PipelineState::Cleanup => {
            matches!(*state, PipelineState::Streaming | PipelineState::Draining)
        }
        PipelineState::Streaming | PipelineState::Done => false,
    };
    if allowed {
        debug!("PIPELINE | {state} -> {next}");
        *state = next;
    }
    allowed
}

async fn join<T>(task: JoinHandle<Result<T, PipelineError>>) -> Result<T, PipelineError> {
    task.await
        .map_err(|e| PipelineError::Join(e.to_string()))?
}

async fn supervise(
    controller: Arc<dyn WorkloadController>,
    handle: WorkloadHandle,
    mut exit: oneshot::Receiver<WorkloadExit>,
    stop: CancellationToken,
    state: Arc<watch::Sender<PipelineState>>,
    grace: Duration,
    timeout: Duration,
) -> Result<Supervision, PipelineError> {
    tokio::select! {
        biased;
        exit = &mut exit => {
            let exit = match exit {
                Ok(exit) => {
                    info!("PIPELINE | Workload {handle} ended: {exit:?}");
                    Some(exit)
                }
                Err(_) => {
                    warn!("PIPELINE | Lost track of workload {handle}");
                    None
                }
            };
            Ok(Supervision { exit, cleaned_up: false })
        }
        () = stop.cancelled() => {
            state.send_if_modified(|state| advance(state, PipelineState::Cleanup));
            let cleaned_up = cleanup(controller.as_ref(), &handle, grace, timeout).await;
            Ok(Supervision { exit: None, cleaned_up })
        }
    }
}

/// Stops and removes the workload within `timeout`. Failures are logged and
/// swallowed.
async fn cleanup(
    controller: &dyn WorkloadController,
    handle: &WorkloadHandle,
    grace: Duration,
    timeout: Duration,
) -> bool {
    info!("PIPELINE | Cleaning up workload {handle}");
    match tokio::time::timeout(timeout, controller.stop_and_remove(handle, grace)).await {
        Ok(Ok(())) => {
            info!("PIPELINE | Workload {handle} stopped and removed");
            true
        }
        Ok(Err(e)) => {
            warn!("PIPELINE | Failed to clean up workload {handle}: {e}");
            false
        }
        Err(_) => {
            warn!("PIPELINE | Cleanup of workload {handle} timed out after {timeout:?}");
            false
        }
    }
}
