// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{process::ExitCode, sync::Arc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use linehaul::{
    bigquery::{BigQueryClient, BigQueryConfig},
    config::Config,
    metrics::IngestMetrics,
    server::Server,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // the subscriber is not installed yet
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Could not parse log level {}: {e}", config.log_level);
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let sink = match BigQueryClient::new(BigQueryConfig {
        base_url: config.bigquery_url.clone(),
        credentials: Arc::new(config.bigquery_token.credentials()),
        https_proxy: config.https_proxy.clone(),
        timeout: config.api_timeout,
    }) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build BigQuery client: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Starting linehaul for {} on {}:{}",
        config.table, config.bind, config.port
    );

    let server = Server::new(config.server_config(), Arc::new(sink));
    let cancel_token = server.cancel_token();
    let metrics = server.metrics();

    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                cancel_token.cancel();
            }
        }
    });

    let reporter = tokio::spawn(report_metrics(
        metrics,
        Duration::from_secs(config.metrics_interval_secs.max(1)),
    ));

    let result = server.run(None).await;
    reporter.abort();

    match result {
        Ok(()) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn report_metrics(metrics: Arc<IngestMetrics>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let s = metrics.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            bytes_received = s.bytes_received,
            lines_skipped = s.lines_skipped,
            events_enqueued = s.events_enqueued,
            sub_batches_sent = s.sub_batches_sent,
            events_sent = s.events_sent,
            sub_batches_dropped = s.sub_batches_dropped,
            events_dropped = s.events_dropped,
            send_retries = s.send_retries,
            "Ingest metrics"
        );
    }
}
