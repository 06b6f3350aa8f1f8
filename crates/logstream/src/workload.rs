// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the workload whose output is shipped.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::errors::WorkloadError;
use crate::source::LineSource;

/// What to run: a shell command inside an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub image: String,
    pub command: String,
}

impl WorkloadSpec {
    pub fn new(image: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: command.into(),
        }
    }

    /// Command line executed inside the container.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        vec![
            "bin/bash".to_string(),
            "-c".to_string(),
            self.command.clone(),
        ]
    }
}

/// Opaque id of a started workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadHandle(String);

impl WorkloadHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Container ids are long; the short form is what `docker ps` shows.
        let short = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "{short}")
    }
}

/// How the workload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadExit {
    Exited(i64),
    /// The exit status could not be determined.
    Failed(String),
}

/// A started workload: its output and a notification when it exits.
pub struct RunningWorkload {
    pub handle: WorkloadHandle,
    pub lines: Box<dyn LineSource>,
    pub exit: oneshot::Receiver<WorkloadExit>,
}

impl fmt::Debug for RunningWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningWorkload")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WorkloadController: Send + Sync {
    /// Prepares and starts the workload, returning once its output can be
    /// read.
    async fn start(&self, spec: &WorkloadSpec) -> Result<RunningWorkload, WorkloadError>;

    /// Stops the workload, giving it `grace` before it is killed, then
    /// removes it. Removal is attempted even when stopping fails.
    async fn stop_and_remove(
        &self,
        handle: &WorkloadHandle,
        grace: Duration,
    ) -> Result<(), WorkloadError>;
}
