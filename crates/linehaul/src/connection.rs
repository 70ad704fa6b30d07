// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection read loop.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::constants::{DEFAULT_MAX_LINE_LENGTH, READ_CHUNK_SIZE};
use crate::framer::LineReceiver;
use crate::metrics::IngestMetrics;
use crate::queue::QueueProducer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Shared secret every line must start with.
    pub token: Option<String>,
    pub max_line_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            token: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Reads `stream` until it ends, queueing every decoded event.
///
/// Read errors end the connection the same way EOF does. Enqueueing waits while the queue
/// is full, which in turn stops reads from this socket.
pub async fn handle_connection<S>(
    mut stream: S,
    producer: QueueProducer,
    config: &ConnectionConfig,
    metrics: &IngestMetrics,
) where
    S: AsyncRead + Unpin,
{
    let mut receiver = LineReceiver::new(config.token.clone(), config.max_line_length);
    let mut buf = [0; READ_CHUNK_SIZE];
    let mut skipped = 0;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!("Connection read failed, treating as end of stream: {}", e);
                0
            }
        };
        if n == 0 {
            break;
        }
        IngestMetrics::add(&metrics.bytes_received, n as u64);

        let mut queue_closed = false;
        for event in receiver.receive_data(&buf[..n]) {
            if producer.put(event).await.is_err() {
                queue_closed = true;
                break;
            }
            IngestMetrics::add(&metrics.events_enqueued, 1);
        }

        IngestMetrics::add(&metrics.lines_skipped, receiver.skipped() - skipped);
        skipped = receiver.skipped();

        if queue_closed {
            warn!("Event queue closed, dropping connection");
            break;
        }
    }

    receiver.close();
}
