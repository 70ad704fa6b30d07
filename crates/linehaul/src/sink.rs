// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The insert interface of the analytical store that receives batches.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::ConfigError;
use crate::event::Download;

/// One record as sent to the sink, tagged with a fresh idempotency id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    #[serde(rename = "insertId")]
    pub insert_id: String,
    pub json: serde_json::Value,
}

impl Row {
    pub fn new(event: &Download) -> Result<Row, serde_json::Error> {
        Ok(Row {
            insert_id: Uuid::new_v4().to_string(),
            json: event.to_json()?,
        })
    }
}

/// Unstructures a sub-batch for one insert attempt. Every call generates new insert ids.
pub fn unstructure(events: &[Download]) -> Result<Vec<Row>, SinkError> {
    events
        .iter()
        .map(Row::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SinkError::Payload(e.to_string()))
}

/// Destination table, `project:dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Accepts `project:dataset.table` and `project.dataset.table`.
    pub fn parse(value: &str) -> Result<TableRef, ConfigError> {
        let invalid = || ConfigError::Table(value.to_string());
        let (project, rest) = value
            .split_once(':')
            .or_else(|| value.split_once('.'))
            .ok_or_else(invalid)?;
        let (dataset, table) = rest.split_once('.').ok_or_else(invalid)?;
        if [project, dataset, table]
            .iter()
            .any(|part| part.is_empty() || part.contains(['/', ':', '.']))
        {
            return Err(invalid());
        }
        Ok(TableRef {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("insert timed out: {0}")]
    Timeout(String),
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("insert failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("{failed} rows rejected: {message}")]
    Rejected { failed: usize, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl SinkError {
    /// Only timeouts are worth resending; everything else fails the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Timeout(_))
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Inserts `rows` into `table`. `partition_hint` names the date shard to write into.
    async fn insert(
        &self,
        table: &TableRef,
        rows: Vec<Row>,
        partition_hint: &str,
    ) -> Result<(), SinkError>;
}
