// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Groups consecutive lines into batches by time window.
//!
//! A window opens with its first line and closes when, whichever comes
//! first:
//!
//! - `batch_window` has elapsed since that first line,
//! - the window holds `max_lines_per_batch` lines,
//! - the next line would push the message past `max_batch_bytes`,
//! - the source ends or the pipeline is cancelled.
//!
//! A closed window becomes one [`LogBatch`] on the pipe. An empty window
//! never produces a batch. Time is read from `tokio::time`, so tests run on
//! the paused clock.

use std::mem;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, SourceError};
use crate::line::{LogBatch, LogLine};
use crate::pipe::PipeSender;
use crate::source::LineSource;

/// What the producer side did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorReport {
    pub lines: usize,
    pub batches: usize,
    pub truncated: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    window: Duration,
    max_lines: usize,
    max_bytes: usize,
}

enum Pulled {
    Line(String),
    Elapsed,
    EndOfStream,
    Cancelled,
}

#[derive(Default)]
struct Window {
    lines: Vec<LogLine>,
    size: usize,
    deadline: Option<Instant>,
}

impl Window {
    fn push(&mut self, line: LogLine, window: Duration) {
        if self.lines.is_empty() {
            self.deadline = Some(Instant::now() + window);
            self.size = line.size();
        } else {
            self.size += 1 + line.size();
        }
        self.lines.push(line);
    }

    fn fits(&self, line: &LogLine, max_bytes: usize) -> bool {
        self.lines.is_empty() || self.size + 1 + line.size() <= max_bytes
    }

    fn take(&mut self) -> Option<LogBatch> {
        self.size = 0;
        self.deadline = None;
        LogBatch::new(mem::take(&mut self.lines))
    }
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            window: config.batch_window,
            max_lines: config.max_lines_per_batch.max(1),
            max_bytes: config.max_batch_bytes.max(1),
        }
    }

    /// Pulls lines from `source` and sends batches until the source ends or
    /// `cancel` fires, then closes the pipe.
    ///
    /// Lines already in the open window are flushed on every exit path,
    /// including a source failure.
    pub async fn run<S>(
        &self,
        source: &mut S,
        sender: PipeSender,
        cancel: CancellationToken,
    ) -> Result<AccumulatorReport, PipelineError>
    where
        S: LineSource + ?Sized,
    {
        let mut report = AccumulatorReport::default();
        let mut window = Window::default();

        loop {
            let pulled = match pull(source, &cancel, window.deadline).await {
                Ok(pulled) => pulled,
                Err(e) => {
                    error!("ACCUMULATOR | Line source failed: {e}");
                    if let Err(flush_error) = self.flush(&mut window, &sender, &mut report).await
                    {
                        debug!("ACCUMULATOR | Could not flush pending lines: {flush_error}");
                    }
                    return Err(e.into());
                }
            };

            match pulled {
                Pulled::Line(text) => {
                    let line = self.stamp(text, &mut report);
                    if !window.fits(&line, self.max_bytes) {
                        self.flush(&mut window, &sender, &mut report).await?;
                    }
                    window.push(line, self.window);
                    if window.lines.len() >= self.max_lines {
                        self.flush(&mut window, &sender, &mut report).await?;
                    }
                }
                Pulled::Elapsed => {
                    self.flush(&mut window, &sender, &mut report).await?;
                }
                Pulled::EndOfStream => {
                    debug!("ACCUMULATOR | Line source ended");
                    self.flush(&mut window, &sender, &mut report).await?;
                    break;
                }
                Pulled::Cancelled => {
                    debug!("ACCUMULATOR | Cancelled, flushing pending lines");
                    report.cancelled = true;
                    self.flush(&mut window, &sender, &mut report).await?;
                    break;
                }
            }
        }

        sender.close();
        debug!(
            "ACCUMULATOR | Sent {} lines in {} batches",
            report.lines, report.batches
        );
        Ok(report)
    }

    fn stamp(&self, mut text: String, report: &mut AccumulatorReport) -> LogLine {
        report.lines += 1;
        if text.len() > self.max_bytes {
            let mut cut = self.max_bytes;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            warn!(
                "ACCUMULATOR | Truncating line of {} bytes to {cut} bytes",
                text.len()
            );
            text.truncate(cut);
            report.truncated += 1;
        }
        LogLine::new(text)
    }

    async fn flush(
        &self,
        window: &mut Window,
        sender: &PipeSender,
        report: &mut AccumulatorReport,
    ) -> Result<(), PipelineError> {
        let Some(batch) = window.take() else {
            return Ok(());
        };
        debug!("ACCUMULATOR | Streaming batch of {} lines", batch.len());
        trace!("ACCUMULATOR | Batch content:\n{}", batch.message());
        sender.send(batch).await?;
        report.batches += 1;
        Ok(())
    }
}

async fn pull<S>(
    source: &mut S,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<Pulled, SourceError>
where
    S: LineSource + ?Sized,
{
    let elapsed = async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(Pulled::Cancelled),
        () = elapsed => Ok(Pulled::Elapsed),
        next = source.next() => Ok(match next? {
            Some(line) => Pulled::Line(line),
            None => Pulled::EndOfStream,
        }),
    }
}
