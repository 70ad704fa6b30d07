// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide ingestion counters.
//!
//! Dropped sub-batches and skipped lines are invisible to senders, so these counters are the
//! only place they surface.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub bytes_received: AtomicU64,
    pub lines_skipped: AtomicU64,
    pub events_enqueued: AtomicU64,
    pub sub_batches_sent: AtomicU64,
    pub events_sent: AtomicU64,
    pub sub_batches_dropped: AtomicU64,
    pub events_dropped: AtomicU64,
    pub send_retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub bytes_received: u64,
    pub lines_skipped: u64,
    pub events_enqueued: u64,
    pub sub_batches_sent: u64,
    pub events_sent: u64,
    pub sub_batches_dropped: u64,
    pub events_dropped: u64,
    pub send_retries: u64,
}

impl IngestMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            lines_skipped: AtomicU64::new(0),
            events_enqueued: AtomicU64::new(0),
            sub_batches_sent: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            sub_batches_dropped: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            send_retries: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub_batch_sent(&self, events: usize) {
        self.sub_batches_sent.fetch_add(1, Ordering::Relaxed);
        self.events_sent.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn sub_batch_dropped(&self, events: usize) {
        self.sub_batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.events_dropped.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            sub_batches_sent: self.sub_batches_sent.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            sub_batches_dropped: self.sub_batches_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            send_retries: self.send_retries.load(Ordering::Relaxed),
        }
    }
}
