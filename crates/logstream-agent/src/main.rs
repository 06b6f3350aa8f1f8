// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod signal;

use std::env;
use std::process;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logstream::cloudwatch::CloudWatchLogs;
use logstream::docker::DockerCli;
use logstream::orchestrator::PipelineOrchestrator;

use crate::config::AgentConfig;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSTREAM_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("hyper=off,reqwest=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    if let Err(e) = run().await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AgentConfig::from_env()?;
    debug!("Loaded configuration: {config:?}");

    let cloudwatch = Arc::new(CloudWatchLogs::new(
        config.endpoint.clone(),
        config.request_timeout,
    )?);
    let docker = Arc::new(DockerCli::new(config.docker_binary.clone()));
    let orchestrator = PipelineOrchestrator::new(
        config.pipeline.clone(),
        docker,
        Arc::clone(&cloudwatch) as Arc<dyn logstream::sink::Sink>,
        cloudwatch,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match signal::shutdown_signal().await {
            Ok(name) => {
                info!("Received {name}, shutting down");
                signal_cancel.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signals: {e}"),
        }
    });

    let report = orchestrator
        .run(&config.workload, config.destination.clone(), cancel)
        .await?;

    if report.cancelled {
        info!(
            "Stopped after {} lines, workload cleaned up: {}",
            report.writer.lines, report.cleaned_up
        );
    } else {
        info!(
            "Shipped {} lines to {} in {} writes",
            report.writer.lines, config.destination, report.writer.writes
        );
    }
    Ok(())
}
