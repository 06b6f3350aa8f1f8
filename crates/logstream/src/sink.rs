// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundary between the pipeline and the log sink.

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::line::{Destination, OrderingToken, SinkEntry};

/// Result of a write the sink accepted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Token the next write must present.
    pub next_token: Option<OrderingToken>,
    /// Positions of entries the sink took the request for but did not store,
    /// ascending.
    pub rejected: Vec<usize>,
}

impl PutOutcome {
    /// Every entry was stored.
    #[must_use]
    pub fn accepted(next_token: Option<OrderingToken>) -> Self {
        Self {
            next_token,
            rejected: Vec::new(),
        }
    }
}

/// Appends entries to a destination that enforces write order with a token.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Writes `entries` in order. `token` is `None` for the first write to a
    /// destination.
    ///
    /// A rejected token must be reported as [`SinkError::StaleToken`] carrying
    /// the token the sink expects.
    async fn put_entries(
        &self,
        destination: &Destination,
        entries: &[SinkEntry],
        token: Option<&OrderingToken>,
    ) -> Result<PutOutcome, SinkError>;
}

/// Creates the destination when it does not exist yet.
#[async_trait]
pub trait DestinationProvisioner: Send + Sync {
    /// Idempotent: calling it for an existing destination succeeds without
    /// creating anything.
    async fn ensure_exists(
        &self,
        destination: &Destination,
        retention_days: i32,
    ) -> Result<(), SinkError>;
}
