// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Top-level composition of listener, queue and batcher.
//!
//! Everything the server starts lives inside [`Server::run`]: connection tasks are owned by
//! the accept loop and dispatch tasks by the batcher, so when `run` returns (a fatal fault in
//! either half, or cancellation) every task it started is aborted with it. Nothing is drained.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batcher::{BatchConfig, Batcher};
use crate::connection::{handle_connection, ConnectionConfig};
use crate::constants::{DEFAULT_BIND, DEFAULT_PORT, DEFAULT_QUEUE_SIZE};
use crate::dispatch::RetryPolicy;
use crate::errors::ServerError;
use crate::metrics::IngestMetrics;
use crate::queue::{self, QueueProducer};
use crate::sink::{Sink, TableRef};

// Pause before accepting again when the process is out of file descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub queue_size: usize,
    pub connection: ConnectionConfig,
    pub batch: BatchConfig,
    pub retry_policy: RetryPolicy,
    pub table: TableRef,
}

impl ServerConfig {
    #[must_use]
    pub fn new(table: TableRef) -> Self {
        ServerConfig {
            host: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            queue_size: DEFAULT_QUEUE_SIZE,
            connection: ConnectionConfig::default(),
            batch: BatchConfig::default(),
            retry_policy: RetryPolicy::default(),
            table,
        }
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct Server {
    config: ServerConfig,
    sink: Arc<dyn Sink>,
    metrics: Arc<IngestMetrics>,
    cancel_token: CancellationToken,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig, sink: Arc<dyn Sink>) -> Self {
        Server {
            config,
            sink,
            metrics: Arc::new(IngestMetrics::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the server and everything it started.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Binds the listener, reports the bound address on `ready`, then serves until a fatal
    /// fault or cancellation.
    pub async fn run(self, ready: Option<oneshot::Sender<SocketAddr>>) -> Result<(), ServerError> {
        if self.config.queue_size == 0 {
            return Err(ServerError::InvalidConfig("queue_size must be non-zero"));
        }
        if self.config.batch.batch_size == 0 {
            return Err(ServerError::InvalidConfig("batch_size must be non-zero"));
        }
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;

        let (producer, consumer) = queue::channel(self.config.queue_size);
        let batcher = Batcher::new(
            consumer,
            Arc::clone(&self.sink),
            Arc::new(self.config.table.clone()),
            self.config.batch,
            self.config.retry_policy.clone(),
            Arc::clone(&self.metrics),
        );

        info!("Listening on {}", local);
        if let Some(ready) = ready {
            let _ = ready.send(local);
        }

        let connection_config = Arc::new(self.config.connection.clone());
        tokio::select! {
            result = batcher.run() => result,
            result = accept_loop(listener, local, producer, connection_config, Arc::clone(&self.metrics)) => result,
            _ = self.cancel_token.cancelled() => {
                info!("Server shutting down");
                Ok(())
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    local: SocketAddr,
    producer: QueueProducer,
    config: Arc<ConnectionConfig>,
    metrics: Arc<IngestMetrics>,
) -> Result<(), ServerError> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let producer = producer.clone();
                    let config = Arc::clone(&config);
                    let metrics = Arc::clone(&metrics);
                    connections.spawn(async move {
                        metrics.connection_opened();
                        handle_connection(stream, producer, &config, &metrics).await;
                        metrics.connection_closed();
                        debug!("Connection from {} closed", peer);
                    });
                }
                Err(e) if is_connection_error(&e) => {
                    debug!("Failed to accept connection: {}", e);
                }
                Err(e) if is_resource_exhausted(&e) => {
                    warn!("Failed to accept connection, backing off: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(source) => {
                    error!("Listener on {} failed: {}", local, source);
                    return Err(ServerError::Accept { local, source });
                }
            },
            Some(finished) = connections.join_next() => {
                if let Err(e) = finished {
                    error!("Connection task failed: {}", e);
                }
            }
        }
    }
}

// Errors that concern only the connection being accepted.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

// EMFILE, ENFILE, ENOBUFS and ENOMEM clear up on their own once connections close.
fn is_resource_exhausted(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    #[cfg(target_os = "linux")]
    const CODES: [i32; 4] = [24, 23, 105, 12];
    #[cfg(not(target_os = "linux"))]
    const CODES: [i32; 4] = [24, 23, 55, 12];
    e.raw_os_error().is_some_and(|code| CODES.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::ScriptedSink;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::new(TableRef::parse("the-psf:pypi.downloads").unwrap());
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        config
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::new(TableRef::parse("p:d.t").unwrap());
        assert_eq!(config.bind_address(), "0.0.0.0:512");
        assert_eq!(config.queue_size, 10_000);
        assert_eq!(config.batch.batch_size, 3);
        assert_eq!(config.batch.batch_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_policy.attempt_timeout, Duration::from_secs(15));
        assert_eq!(config.retry_policy.max_attempts, 15);
    }

    #[test]
    fn test_accept_error_classification() {
        assert!(is_connection_error(&io::ErrorKind::ConnectionAborted.into()));
        assert!(!is_connection_error(&io::ErrorKind::PermissionDenied.into()));
        assert!(is_resource_exhausted(&io::Error::from_raw_os_error(24)));
        assert!(!is_resource_exhausted(&io::ErrorKind::InvalidInput.into()));
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.port = taken.local_addr().unwrap().port();

        let server = Server::new(config, Arc::new(ScriptedSink::default()));
        assert!(matches!(
            server.run(None).await,
            Err(ServerError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_sizes_are_rejected() {
        let mut no_queue = config();
        no_queue.queue_size = 0;
        let server = Server::new(no_queue, Arc::new(ScriptedSink::default()));
        assert!(matches!(
            server.run(None).await,
            Err(ServerError::InvalidConfig(_))
        ));

        let mut no_batch = config();
        no_batch.batch.batch_size = 0;
        let server = Server::new(no_batch, Arc::new(ScriptedSink::default()));
        assert!(matches!(
            server.run(None).await,
            Err(ServerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_server() {
        let server = Server::new(config(), Arc::new(ScriptedSink::default()));
        let cancel_token = server.cancel_token();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(server.run(Some(ready_tx)));

        let local = ready_rx.await.unwrap();
        let mut client = TcpStream::connect(local).await.unwrap();
        client.write_all(b"partial line without newline").await.unwrap();

        cancel_token.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
