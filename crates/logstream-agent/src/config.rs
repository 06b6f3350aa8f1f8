// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use logstream::cloudwatch::regional_endpoint;
use logstream::config::PipelineConfig;
use logstream::constants::DEFAULT_REQUEST_TIMEOUT;
use logstream::errors::ConfigError;
use logstream::line::Destination;
use logstream::workload::WorkloadSpec;

const DEFAULT_DOCKER_BINARY: &str = "docker";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub workload: WorkloadSpec,
    pub destination: Destination,
    /// CloudWatch Logs endpoint, either given or derived from the region.
    pub endpoint: String,
    pub docker_binary: String,
    pub request_timeout: Duration,
    pub pipeline: PipelineConfig,
}

impl AgentConfig {
    /// Reads the agent configuration from `LOGSTREAM_*` variables.
    ///
    /// Every missing required variable is reported in one error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut required = |key: &str| {
            let value = non_empty(key);
            if value.is_none() {
                missing.push(key.to_string());
            }
            value.unwrap_or_default()
        };

        let image = required("LOGSTREAM_DOCKER_IMAGE");
        let command = required("LOGSTREAM_BASH_COMMAND");
        let group = required("LOGSTREAM_GROUP");
        let stream = required("LOGSTREAM_STREAM");

        let endpoint = match (non_empty("LOGSTREAM_ENDPOINT"), non_empty("LOGSTREAM_REGION")) {
            (Some(endpoint), _) => endpoint,
            (None, Some(region)) => regional_endpoint(&region),
            (None, None) => {
                missing.push("LOGSTREAM_ENDPOINT or LOGSTREAM_REGION".to_string());
                String::new()
            }
        };

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let request_timeout = non_empty("LOGSTREAM_REQUEST_TIMEOUT_MS")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis);

        Ok(Self {
            workload: WorkloadSpec::new(image, command),
            destination: Destination::new(group, stream),
            endpoint,
            docker_binary: non_empty("LOGSTREAM_DOCKER_BINARY")
                .unwrap_or_else(|| DEFAULT_DOCKER_BINARY.to_string()),
            request_timeout,
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
