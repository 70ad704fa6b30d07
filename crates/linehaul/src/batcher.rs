// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collects events from the queue into time and size bounded batches, splits each batch by
//! day and hands every day to its own dispatch task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error};

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT};
use crate::dispatch::{send_batch, RetryPolicy};
use crate::errors::ServerError;
use crate::event::Download;
use crate::metrics::IngestMetrics;
use crate::queue::QueueConsumer;
use crate::sink::{Sink, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Most events collected in one cycle.
    pub batch_size: usize,
    /// Longest a cycle waits for `batch_size` events.
    pub batch_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

/// Events of one batch that share a partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBatch {
    pub partition: String,
    pub events: Vec<Download>,
}

/// Partition key of an event: its UTC date as `YYYYMMDD`.
#[must_use]
pub fn partition_key(event: &Download) -> String {
    event.timestamp.format("%Y%m%d").to_string()
}

/// Splits a batch by partition key. Sub-batches come out in key order; events keep their
/// arrival order within a key.
#[must_use]
pub fn compute_batches(events: Vec<Download>) -> Vec<SubBatch> {
    let mut keyed: Vec<(String, Download)> = events
        .into_iter()
        .map(|event| (partition_key(&event), event))
        .collect();
    // stable, so ties keep arrival order
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut batches: Vec<SubBatch> = Vec::new();
    for (key, event) in keyed {
        match batches.last_mut() {
            Some(batch) if batch.partition == key => batch.events.push(event),
            _ => batches.push(SubBatch {
                partition: key,
                events: vec![event],
            }),
        }
    }
    batches
}

pub struct Batcher {
    consumer: QueueConsumer,
    sink: Arc<dyn Sink>,
    table: Arc<TableRef>,
    config: BatchConfig,
    retry_policy: RetryPolicy,
    metrics: Arc<IngestMetrics>,
    in_flight: JoinSet<()>,
}

impl Batcher {
    #[must_use]
    pub fn new(
        consumer: QueueConsumer,
        sink: Arc<dyn Sink>,
        table: Arc<TableRef>,
        config: BatchConfig,
        retry_policy: RetryPolicy,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Batcher {
            consumer,
            sink,
            table,
            config,
            retry_policy,
            metrics,
            in_flight: JoinSet::new(),
        }
    }

    /// Runs collection cycles until the queue closes, which is a fatal fault.
    ///
    /// Dispatch tasks belong to this batcher: dropping the future returned here aborts them.
    pub async fn run(mut self) -> Result<(), ServerError> {
        debug!("Batcher started");
        loop {
            let batch = self.collect().await?;
            self.reap();
            if batch.is_empty() {
                continue;
            }
            self.dispatch(batch);
        }
    }

    /// Waits for up to `batch_size` events, giving up once `batch_timeout` has passed since
    /// the cycle started.
    pub async fn collect(&mut self) -> Result<Vec<Download>, ServerError> {
        let deadline = Instant::now() + self.config.batch_timeout;
        let mut batch = Vec::with_capacity(self.config.batch_size);
        while batch.len() < self.config.batch_size {
            match timeout_at(deadline, self.consumer.get()).await {
                Ok(Some(event)) => batch.push(event),
                Ok(None) => {
                    error!("Event queue closed, stopping batcher");
                    return Err(ServerError::QueueClosed);
                }
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    fn dispatch(&mut self, batch: Vec<Download>) {
        for SubBatch { partition, events } in compute_batches(batch) {
            debug!("Dispatching {} events for {}", events.len(), partition);
            self.in_flight.spawn(send_batch(
                Arc::clone(&self.sink),
                Arc::clone(&self.table),
                partition,
                events,
                self.retry_policy.clone(),
                Arc::clone(&self.metrics),
            ));
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                error!("Dispatch task failed: {}", e);
            }
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{Outcome, ScriptedSink};
    use crate::queue::{self, tests::download};

    fn projects(batch: &SubBatch) -> Vec<&str> {
        batch
            .events
            .iter()
            .filter_map(|e| e.file.project.as_deref())
            .collect()
    }

    fn batcher(
        consumer: QueueConsumer,
        sink: Arc<ScriptedSink>,
        config: BatchConfig,
    ) -> Batcher {
        Batcher::new(
            consumer,
            sink,
            Arc::new(TableRef::parse("the-psf:pypi.downloads").unwrap()),
            config,
            RetryPolicy::default(),
            Arc::new(IngestMetrics::new()),
        )
    }

    #[test]
    fn test_partition_key_is_fixed_width() {
        assert_eq!(partition_key(&download(5, "a")), "20180705");
        assert_eq!(partition_key(&download(20, "a")), "20180720");
    }

    #[test]
    fn test_compute_batches_groups_by_date() {
        let batches = compute_batches(vec![
            download(21, "first"),
            download(20, "second"),
            download(21, "third"),
        ]);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].partition, "20180720");
        assert_eq!(projects(&batches[0]), ["second"]);
        assert_eq!(batches[1].partition, "20180721");
        assert_eq!(projects(&batches[1]), ["first", "third"]);
    }

    #[test]
    fn test_compute_batches_empty() {
        assert!(compute_batches(Vec::new()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_does_not_wait_for_timeout() {
        let (producer, consumer) = queue::channel(10);
        let mut batcher = batcher(consumer, Arc::new(ScriptedSink::default()), BatchConfig::default());
        for project in ["a", "b", "c", "d"] {
            producer.put(download(20, project)).await.unwrap();
        }

        let started = Instant::now();
        let batch = batcher.collect().await.unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(producer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cycle_on_timeout() {
        let (producer, consumer) = queue::channel(10);
        let mut batcher = batcher(consumer, Arc::new(ScriptedSink::default()), BatchConfig::default());

        let started = Instant::now();
        let batch = batcher.collect().await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(started.elapsed(), DEFAULT_BATCH_TIMEOUT);
        drop(producer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_after_timeout() {
        let (producer, consumer) = queue::channel(10);
        let mut batcher = batcher(consumer, Arc::new(ScriptedSink::default()), BatchConfig::default());
        producer.put(download(20, "a")).await.unwrap();

        let batch = batcher.collect().await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_fatal() {
        let (producer, consumer) = queue::channel(10);
        drop(producer);
        let batcher = batcher(consumer, Arc::new(ScriptedSink::default()), BatchConfig::default());

        assert!(matches!(batcher.run().await, Err(ServerError::QueueClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_dispatches_one_call_per_day() {
        let (producer, consumer) = queue::channel(10);
        let sink = Arc::new(ScriptedSink::default());
        let task = tokio::spawn(batcher(consumer, sink.clone(), BatchConfig::default()).run());

        producer.put(download(20, "a")).await.unwrap();
        producer.put(download(21, "b")).await.unwrap();
        producer.put(download(20, "c")).await.unwrap();

        while sink.call_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        {
            let mut calls = sink.calls.lock().unwrap().clone();
            calls.sort_by(|a, b| a.0.cmp(&b.0));
            assert_eq!(calls[0].0, "20180720");
            assert_eq!(calls[0].1.len(), 2);
            assert_eq!(calls[0].1[0].json["file"]["project"], "a");
            assert_eq!(calls[0].1[1].json["file"]["project"], "c");
            assert_eq!(calls[1].0, "20180721");
            assert_eq!(calls[1].1.len(), 1);
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_dispatch_does_not_block_next_cycle() {
        let (producer, consumer) = queue::channel(10);
        let sink = Arc::new(ScriptedSink::new(vec![Outcome::Hang]));
        let config = BatchConfig {
            batch_size: 1,
            batch_timeout: Duration::from_secs(30),
        };
        let mut batcher = batcher(consumer, sink.clone(), config);

        producer.put(download(20, "a")).await.unwrap();
        producer.put(download(20, "b")).await.unwrap();

        let first = batcher.collect().await.unwrap();
        batcher.dispatch(first);
        let second = batcher.collect().await.unwrap();
        batcher.dispatch(second);
        assert_eq!(batcher.in_flight(), 2);

        // the first insert hangs until its deadline, the second goes straight through
        while sink.call_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let calls = sink.calls.lock().unwrap().clone();
        assert_eq!(calls[0].1[0].json["file"]["project"], "a");
        assert_eq!(calls[1].1[0].json["file"]["project"], "b");

        batcher.reap();
        assert_eq!(batcher.in_flight(), 1);
    }
}
