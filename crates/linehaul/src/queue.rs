// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO hand-off between connection handlers and the batcher.
//!
//! `put` waits while the queue is full; waiting producers are admitted in the order they
//! started waiting. Nothing is ever dropped at this layer.

use tokio::sync::mpsc;

use crate::event::Download;

/// Returned by [`QueueProducer::put`] once the consumer is gone. Carries the rejected event.
#[derive(Debug, thiserror::Error)]
#[error("event queue closed")]
pub struct QueueClosed(pub Download);

#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<Download>,
}

#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<Download>,
}

/// Creates a queue holding at most `capacity` events. A `capacity` of zero is raised to one.
#[must_use]
pub fn channel(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueProducer { tx }, QueueConsumer { rx })
}

impl QueueProducer {
    pub async fn put(&self, event: Download) -> Result<(), QueueClosed> {
        self.tx.send(event).await.map_err(|e| QueueClosed(e.0))
    }

    /// Number of events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl QueueConsumer {
    /// Waits for the next event. Returns `None` once every producer has been dropped and the
    /// queue is drained.
    pub async fn get(&mut self) -> Option<Download> {
        self.rx.recv().await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
