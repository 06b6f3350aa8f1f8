// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line sources feeding the batch accumulator.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

use crate::errors::SourceError;

/// Yields lines of workload output.
///
/// `next` must be cancel safe: the accumulator races it against the window
/// deadline and the cancellation token, and a line must not be lost when the
/// race drops the pending call. Once it returned `Ok(None)` it keeps
/// returning `Ok(None)`.
#[async_trait]
pub trait LineSource: Send {
    async fn next(&mut self) -> Result<Option<String>, SourceError>;
}

/// Splits any buffered async reader into lines.
///
/// Trailing `\r` is stripped since TTY-attached output ends lines with `\r\n`.
pub struct ReaderLineSource<R> {
    lines: Option<Lines<R>>,
}

impl<R: AsyncBufRead + Unpin + Send> ReaderLineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Some(reader.lines()),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LineSource for ReaderLineSource<R> {
    async fn next(&mut self) -> Result<Option<String>, SourceError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        match lines.next_line().await {
            Ok(Some(mut line)) => {
                if line.ends_with('\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Ok(None) => {
                self.lines = None;
                Ok(None)
            }
            Err(e) => {
                self.lines = None;
                Err(SourceError::Io(e))
            }
        }
    }
}

/// Lines pushed by another task over a channel. Ends when every sender is
/// dropped.
pub struct ChannelLineSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelLineSource {
    /// Returns the source and the sender feeding it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx }, tx)
    }
}

#[async_trait]
impl LineSource for ChannelLineSource {
    async fn next(&mut self) -> Result<Option<String>, SourceError> {
        Ok(self.rx.recv().await)
    }
}
