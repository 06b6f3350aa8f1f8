// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Logstream
//!
//! Ships the output of a running container to CloudWatch Logs.
//!
//! ## Overview
//!
//! ```text
//!   LineSource ─> BatchAccumulator ─> pipe ─> SequencedSinkWriter ─> Sink
//! ```
//!
//! - [`source`]: lines of workload output
//! - [`accumulator`]: folds lines arriving within a time window into one batch
//! - [`pipe`]: bounded, ordered hand-off between producer and writer
//! - [`writer`]: sequenced writes with the sink's ordering token
//! - [`orchestrator`]: runs the tasks, handles cancellation and cleanup
//! - [`cloudwatch`] and [`docker`]: the sink and workload adapters

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod cloudwatch;
pub mod config;
pub mod constants;
pub mod docker;
pub mod errors;
pub mod line;
pub mod orchestrator;
pub mod pipe;
pub mod sink;
pub mod source;
pub mod workload;
pub mod writer;

#[cfg(test)]
mod test_support;
