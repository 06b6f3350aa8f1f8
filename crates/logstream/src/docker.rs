// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Workload controller driving the `docker` command line client.
//!
//! The container is created with a TTY, so `docker logs --follow` yields the
//! combined stdout and stderr of the workload on a single stream.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::{SourceError, WorkloadError};
use crate::source::{LineSource, ReaderLineSource};
use crate::workload::{
    RunningWorkload, WorkloadController, WorkloadExit, WorkloadHandle, WorkloadSpec,
};

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    /// Runs a command to completion and returns its trimmed stdout. Dropping
    /// the future kills the command.
    async fn run(&self, args: &[&str]) -> Result<String, WorkloadError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| WorkloadError::Spawn {
                command: self.command_line(args),
                source,
            })?;

        if !output.status.success() {
            return Err(WorkloadError::CommandFailed {
                command: self.command_line(args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn pull(&self, image: &str) -> Result<(), WorkloadError> {
        let args = ["pull", image];
        let mut child = self.spawn(&args, Stdio::null())?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("DOCKER | {line}");
            }
        }

        let status = child.wait().await.map_err(|source| WorkloadError::Spawn {
            command: self.command_line(&args),
            source,
        })?;
        if !status.success() {
            return Err(WorkloadError::CommandFailed {
                command: self.command_line(&args),
                status: status.to_string(),
                stderr: format!("failed to pull {image}"),
            });
        }
        Ok(())
    }

    fn spawn(&self, args: &[&str], stderr: Stdio) -> Result<Child, WorkloadError> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkloadError::Spawn {
                command: self.command_line(args),
                source,
            })
    }

    async fn follow_logs(
        &self,
        handle: &WorkloadHandle,
    ) -> Result<ProcessLineSource, WorkloadError> {
        let args = ["logs", "--follow", handle.id()];
        let mut child = self.spawn(&args, Stdio::null())?;
        let Some(stdout) = child.stdout.take() else {
            return Err(WorkloadError::CommandFailed {
                command: self.command_line(&args),
                status: "running".to_string(),
                stderr: "stdout was not captured".to_string(),
            });
        };
        Ok(ProcessLineSource {
            lines: ReaderLineSource::new(BufReader::new(stdout)),
            _child: child,
        })
    }

    fn watch_exit(&self, handle: &WorkloadHandle) -> oneshot::Receiver<WorkloadExit> {
        let (tx, rx) = oneshot::channel();
        let cli = self.clone();
        let id = handle.id().to_string();
        tokio::spawn(async move {
            let exit = match cli.run(&["wait", &id]).await {
                Ok(status) => match status.parse::<i64>() {
                    Ok(code) => WorkloadExit::Exited(code),
                    Err(_) => WorkloadExit::Failed(format!("unexpected exit status '{status}'")),
                },
                Err(e) => WorkloadExit::Failed(e.to_string()),
            };
            // The receiver is gone when the pipeline already finished.
            let _ = tx.send(exit);
        });
        rx
    }

    async fn start_created(
        &self,
        handle: &WorkloadHandle,
    ) -> Result<ProcessLineSource, WorkloadError> {
        self.run(&["start", handle.id()]).await?;
        self.follow_logs(handle).await
    }
}

#[async_trait]
impl WorkloadController for DockerCli {
    async fn start(&self, spec: &WorkloadSpec) -> Result<RunningWorkload, WorkloadError> {
        info!("DOCKER | Pulling {}", spec.image);
        self.pull(&spec.image).await?;

        let argv = spec.argv();
        let mut args = vec!["create", "--tty", spec.image.as_str()];
        args.extend(argv.iter().map(String::as_str));
        let id = self.run(&args).await?;
        if id.is_empty() {
            return Err(WorkloadError::CommandFailed {
                command: self.command_line(&args),
                status: "0".to_string(),
                stderr: "no container id was printed".to_string(),
            });
        }
        let handle = WorkloadHandle::new(id);
        info!("DOCKER | Created container {handle}");

        let lines = match self.start_created(&handle).await {
            Ok(lines) => lines,
            Err(e) => {
                if let Err(cleanup) = self.run(&["rm", "--force", handle.id()]).await {
                    warn!("DOCKER | Failed to remove {handle} after failed start: {cleanup}");
                }
                return Err(e);
            }
        };

        let exit = self.watch_exit(&handle);
        Ok(RunningWorkload {
            handle,
            lines: Box::new(lines),
            exit,
        })
    }

    async fn stop_and_remove(
        &self,
        handle: &WorkloadHandle,
        grace: Duration,
    ) -> Result<(), WorkloadError> {
        let grace = stop_timeout_secs(grace).to_string();
        info!("DOCKER | Stopping {handle}");
        if let Err(e) = self.run(&["stop", "-t", &grace, handle.id()]).await {
            // `rm --force` kills whatever is still running.
            warn!("DOCKER | Failed to stop {handle}: {e}");
        }

        info!("DOCKER | Removing {handle}");
        self.run(&["rm", "--force", handle.id()]).await?;
        Ok(())
    }
}

// `docker stop -t` takes whole seconds; a partial second rounds up.
fn stop_timeout_secs(grace: Duration) -> u64 {
    grace.as_secs() + u64::from(grace.subsec_nanos() > 0)
}

/// Lines of a `docker logs --follow` process. The process is killed when the
/// source is dropped.
struct ProcessLineSource {
    lines: ReaderLineSource<BufReader<ChildStdout>>,
    _child: Child,
}

#[async_trait]
impl LineSource for ProcessLineSource {
    async fn next(&mut self) -> Result<Option<String>, SourceError> {
        self.lines.next().await
    }
}
