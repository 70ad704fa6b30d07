// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one sub-batch to the sink.
//!
//! [`send_batch_with_retry`] is the retry loop: each attempt is bounded by a deadline, only
//! timeouts are retried, and waits between attempts are drawn at random from an exponentially
//! growing window. [`send_batch`] wraps it and is the single place where a failed sub-batch is
//! dropped; no error leaves it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, warn};

use crate::constants::{
    DEFAULT_API_TIMEOUT, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF,
};
use crate::event::Download;
use crate::metrics::IngestMetrics;
use crate::sink::{unstructure, Sink, SinkError, TableRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Upper bound of the first backoff window; doubles after every failed attempt.
    pub multiplier: Duration,
    pub max_backoff: Duration,
    /// Deadline for a single insert call.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff: DEFAULT_MAX_BACKOFF,
            attempt_timeout: DEFAULT_API_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after failed attempt `attempt` (1-based):
    /// `min(max_backoff, multiplier * 2^(attempt - 1))`.
    #[must_use]
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.multiplier
            .checked_mul(1u32 << exp)
            .map_or(self.max_backoff, |ceiling| ceiling.min(self.max_backoff))
    }

    /// Wait after failed attempt `attempt`, uniform in `[0, backoff_ceiling(attempt)]`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_ceiling(attempt).mul_f64(fastrand::f64())
    }
}

/// Inserts `events` as one call, retrying timeouts according to `policy`.
///
/// Rows are rebuilt for every attempt, so each attempt carries fresh insert ids. Returns the
/// last error once a non-retryable error occurs or the attempts run out.
pub async fn send_batch_with_retry(
    sink: &dyn Sink,
    table: &TableRef,
    partition: &str,
    events: &[Download],
    policy: &RetryPolicy,
    metrics: &IngestMetrics,
) -> Result<(), SinkError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let rows = unstructure(events)?;
        let started = Instant::now();

        let result = match timeout(policy.attempt_timeout, sink.insert(table, rows, partition)).await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(format!(
                "no response after {} ms",
                policy.attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(()) => {
                debug!(
                    "Sent {} events for {} in {} ms (attempt {})",
                    events.len(),
                    partition,
                    started.elapsed().as_millis(),
                    attempt
                );
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.backoff(attempt);
                warn!(
                    "Attempt {} of {} for {} failed: {}. Retrying in {} ms",
                    attempt,
                    policy.max_attempts,
                    partition,
                    e,
                    wait.as_millis()
                );
                IngestMetrics::add(&metrics.send_retries, 1);
                sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends one sub-batch and drops it on failure. This is the task body the batcher spawns.
pub async fn send_batch(
    sink: Arc<dyn Sink>,
    table: Arc<TableRef>,
    partition: String,
    events: Vec<Download>,
    policy: RetryPolicy,
    metrics: Arc<IngestMetrics>,
) {
    match send_batch_with_retry(
        sink.as_ref(),
        &table,
        &partition,
        &events,
        &policy,
        &metrics,
    )
    .await
    {
        Ok(()) => metrics.sub_batch_sent(events.len()),
        Err(e) => {
            error!(
                "Dropping {} events for {}{}: {}",
                events.len(),
                table,
                partition,
                e
            );
            metrics.sub_batch_dropped(events.len());
        }
    }
}
