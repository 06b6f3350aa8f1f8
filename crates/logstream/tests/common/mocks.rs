// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of the pipeline collaborators for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use logstream::errors::{SinkError, WorkloadError};
use logstream::line::{Destination, OrderingToken, SinkEntry};
use logstream::sink::{DestinationProvisioner, PutOutcome, Sink};
use logstream::source::ChannelLineSource;
use logstream::workload::{
    RunningWorkload, WorkloadController, WorkloadExit, WorkloadHandle, WorkloadSpec,
};
use tokio::sync::{mpsc, oneshot};

/// One `put_entries` call as the sink saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub messages: Vec<String>,
    pub timestamps: Vec<i64>,
    pub token: Option<String>,
}

#[derive(Default)]
struct SinkState {
    expected: Option<OrderingToken>,
    accepted: usize,
    stored: Vec<String>,
    attempts: Vec<Attempt>,
}

/// Sink enforcing the ordering token like CloudWatch does.
///
/// Writes presenting anything but the last returned token are rejected as
/// stale. `rotate_before` changes the expected token right before the given
/// attempt, as if another writer had appended to the stream.
#[derive(Default)]
pub struct SequencingSink {
    state: Mutex<SinkState>,
    rotate_before: HashMap<usize, String>,
    fail_at: Option<usize>,
    latency: Duration,
}

#[allow(dead_code)]
impl SequencingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rotate_before(mut self, attempt: usize, token: &str) -> Self {
        self.rotate_before.insert(attempt, token.to_string());
        self
    }

    pub fn fail_at(mut self, attempt: usize) -> Self {
        self.fail_at = Some(attempt);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Messages stored by accepted writes, in order.
    pub fn stored(&self) -> Vec<String> {
        self.state.lock().unwrap().stored.clone()
    }

    /// Stored messages split back into lines.
    pub fn lines(&self) -> Vec<String> {
        self.stored()
            .iter()
            .flat_map(|message| message.split('\n').map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl Sink for SequencingSink {
    async fn put_entries(
        &self,
        _destination: &Destination,
        entries: &[SinkEntry],
        token: Option<&OrderingToken>,
    ) -> Result<PutOutcome, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().unwrap();
        let attempt = state.attempts.len();
        state.attempts.push(Attempt {
            messages: entries.iter().map(|e| e.message.clone()).collect(),
            timestamps: entries.iter().map(|e| e.timestamp_ms).collect(),
            token: token.map(|t| t.as_str().to_string()),
        });

        if self.fail_at == Some(attempt) {
            return Err(SinkError::Rejected {
                code: "ServiceUnavailableException".to_string(),
                message: "try again later".to_string(),
            });
        }
        if let Some(rotated) = self.rotate_before.get(&attempt) {
            state.expected = Some(OrderingToken::from(rotated.as_str()));
        }
        if token != state.expected.as_ref() {
            return Err(SinkError::StaleToken {
                expected: state.expected.clone(),
            });
        }

        state.accepted += 1;
        state
            .stored
            .extend(entries.iter().map(|e| e.message.clone()));
        let next = OrderingToken::new(format!("seq-{}", state.accepted));
        state.expected = Some(next.clone());
        Ok(PutOutcome::accepted(Some(next)))
    }
}

#[derive(Default)]
pub struct MockProvisioner {
    calls: AtomicUsize,
    fail: bool,
}

#[allow(dead_code)]
impl MockProvisioner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationProvisioner for MockProvisioner {
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

/// How the mock workload reacts to stop and remove.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Succeed,
    Fail,
    Hang,
}

/// Feeds the mock workload from the test.
pub struct WorkloadDriver {
    pub lines: mpsc::Sender<String>,
    pub exit: oneshot::Sender<WorkloadExit>,
}

#[allow(dead_code)]
impl WorkloadDriver {
    pub async fn emit(&self, lines: &[&str]) {
        for line in lines {
            self.lines.send((*line).to_string()).await.unwrap();
        }
    }

    /// Ends the output and reports the exit code.
    pub fn finish(self, code: i64) {
        drop(self.lines);
        let _ = self.exit.send(WorkloadExit::Exited(code));
    }
}

/// Workload whose output and exit are driven by a [`WorkloadDriver`].
pub struct MockWorkload {
    parts: Mutex<Option<(ChannelLineSource, oneshot::Receiver<WorkloadExit>)>>,
    fail_start: bool,
    hang_start: bool,
    cleanup: Cleanup,
    cleanups: AtomicUsize,
}

#[allow(dead_code)]
impl MockWorkload {
    pub fn new(cleanup: Cleanup) -> (Arc<Self>, WorkloadDriver) {
        let (source, lines) = ChannelLineSource::new(1_024);
        let (exit_tx, exit_rx) = oneshot::channel();
        let workload = Arc::new(Self {
            parts: Mutex::new(Some((source, exit_rx))),
            fail_start: false,
            hang_start: false,
            cleanup,
            cleanups: AtomicUsize::new(0),
        });
        let driver = WorkloadDriver {
            lines,
            exit: exit_tx,
        };
        (workload, driver)
    }

    pub fn failing_start() -> Arc<Self> {
        Arc::new(Self {
            parts: Mutex::new(None),
            fail_start: true,
            hang_start: false,
            cleanup: Cleanup::Succeed,
            cleanups: AtomicUsize::new(0),
        })
    }

    /// Workload whose start never completes, like a pull that stalls.
    pub fn stuck_start() -> Arc<Self> {
        Arc::new(Self {
            parts: Mutex::new(None),
            fail_start: false,
            hang_start: true,
            cleanup: Cleanup::Succeed,
            cleanups: AtomicUsize::new(0),
        })
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadController for MockWorkload {
    async fn start(&self, spec: &WorkloadSpec) -> Result<RunningWorkload, WorkloadError> {
        if self.hang_start {
            std::future::pending::<()>().await;
        }
        if self.fail_start {
            return Err(WorkloadError::CommandFailed {
                command: format!("docker pull {}", spec.image),
                status: "exit status: 1".to_string(),
                stderr: "manifest unknown".to_string(),
            });
        }
        let Some((source, exit)) = self.parts.lock().unwrap().take() else {
            return Err(WorkloadError::CommandFailed {
                command: "docker start".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "already started".to_string(),
            });
        };
        Ok(RunningWorkload {
            handle: WorkloadHandle::new("mock-workload"),
            lines: Box::new(source),
            exit,
        })
    }

    async fn stop_and_remove(
        &self,
        handle: &WorkloadHandle,
        _grace: Duration,
    ) -> Result<(), WorkloadError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        match self.cleanup {
            Cleanup::Succeed => Ok(()),
            Cleanup::Fail => Err(WorkloadError::CommandFailed {
                command: format!("docker rm --force {}", handle.id()),
                status: "exit status: 1".to_string(),
                stderr: "No such container".to_string(),
            }),
            Cleanup::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
