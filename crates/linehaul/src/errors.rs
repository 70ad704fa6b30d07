// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

/// Error parsing a syslog envelope or a download event payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("line does not start with the configured token")]
    TokenMismatch,
    #[error("invalid syslog priority: {0}")]
    Priority(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("malformed syslog header: {0}")]
    Header(&'static str),
    #[error("unknown event format: {0}")]
    UnknownVersion(String),
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("invalid url: {0}")]
    Url(String),
}

/// Faults that end the server scope.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to accept connection on {local}: {source}")]
    Accept {
        local: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("event queue closed")]
    QueueClosed,
    #[error("invalid server configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Invalid process configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("invalid table reference {0:?}, expected project:dataset.table")]
    Table(String),
}
