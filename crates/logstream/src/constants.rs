// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and CloudWatch Logs API limits.
//!
//! The limits mirror the PutLogEvents quotas: a batch becomes one log event,
//! so a batch may not exceed the per-event size, and a single write may not
//! exceed the per-request event count or byte size.

use std::time::Duration;

/// How long lines are held after the first line of a window before the
/// window is flushed as one batch.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(2);

/// Maximum number of lines folded into one batch.
pub const DEFAULT_MAX_LINES_PER_BATCH: usize = 1_000;

/// Bytes CloudWatch charges per event on top of the UTF-8 message length.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Maximum message size of one log event.
///
/// CloudWatch accepts 256 KiB per event including the per-event overhead.
pub const MAX_EVENT_SIZE_BYTES: usize = 256 * 1_024 - EVENT_OVERHEAD_BYTES;

/// Number of batches the pipe holds before the producer waits.
pub const DEFAULT_PIPE_CAPACITY: usize = 20;

/// Maximum number of log events in one PutLogEvents call.
pub const MAX_EVENTS_PER_WRITE: usize = 10_000;

/// Maximum size of one PutLogEvents call, overhead included.
pub const MAX_WRITE_BYTES: usize = 1_024 * 1_024;

/// Minimum spacing between two consecutive writes to the same stream.
///
/// CloudWatch historically allowed five PutLogEvents calls per second per
/// stream.
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(200);

/// Retention applied to log groups created by the provisioner.
pub const DEFAULT_RETENTION_DAYS: i32 = 14;

/// Retention values accepted by PutRetentionPolicy.
pub const VALID_RETENTION_DAYS: &[i32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Grace period the workload gets to stop before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Upper bound for the whole stop-and-remove sequence after cancellation.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-request timeout of the CloudWatch client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
