// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use logstream::config::PipelineConfig;
use logstream::line::Destination;
use logstream::orchestrator::PipelineOrchestrator;
use logstream::sink::{DestinationProvisioner, Sink};
use logstream::workload::{WorkloadController, WorkloadSpec};

use super::mocks::{MockProvisioner, SequencingSink};

/// Configuration with pacing disabled so only the batch window moves time.
#[allow(dead_code)]
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        write_interval: Duration::ZERO,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn destination() -> Destination {
    Destination::new("app", "worker-1")
}

#[allow(dead_code)]
pub fn spec() -> WorkloadSpec {
    WorkloadSpec::new("ubuntu:22.04", "for i in 1 2 3; do echo $i; done")
}

#[allow(dead_code)]
pub fn orchestrator(
    config: PipelineConfig,
    controller: Arc<dyn WorkloadController>,
    sink: &Arc<SequencingSink>,
    provisioner: &Arc<MockProvisioner>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        config,
        controller,
        Arc::clone(sink) as Arc<dyn Sink>,
        Arc::clone(provisioner) as Arc<dyn DestinationProvisioner>,
    )
}
