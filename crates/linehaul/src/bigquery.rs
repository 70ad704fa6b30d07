// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming-insert client for BigQuery's `tabledata.insertAll` endpoint.
//!
//! The partition hint is sent as `templateSuffix`, so rows land in `<table><suffix>`, a
//! table created on demand from the base table's schema.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sink::{Row, Sink, SinkError, TableRef};
use crate::token::Credentials;

#[derive(Debug, Clone)]
pub struct BigQueryClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<Credentials>,
}

pub struct BigQueryConfig {
    /// e.g. `https://bigquery.googleapis.com`
    pub base_url: String,
    pub credentials: Arc<Credentials>,
    pub https_proxy: Option<String>,
    /// Client-side limit for one request.
    pub timeout: Duration,
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    rows: &'a [Row],
    #[serde(rename = "templateSuffix")]
    template_suffix: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct InsertAllResponse {
    #[serde(default, rename = "insertErrors")]
    insert_errors: Vec<InsertError>,
}

#[derive(Debug, Deserialize)]
struct InsertError {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

pub fn build_client(
    https_proxy: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(config.https_proxy.as_deref(), config.timeout)?;
        Ok(BigQueryClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: config.credentials,
        })
    }

    fn insert_url(&self, table: &TableRef) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, table.project, table.dataset, table.table
        )
    }
}

#[async_trait]
impl Sink for BigQueryClient {
    async fn insert(
        &self,
        table: &TableRef,
        rows: Vec<Row>,
        partition_hint: &str,
    ) -> Result<(), SinkError> {
        let token = self.credentials.bearer_token().await?;
        let body = InsertAllRequest {
            rows: &rows,
            template_suffix: partition_hint,
        };

        let resp = self
            .client
            .post(self.insert_url(table))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(e.to_string())
                } else {
                    SinkError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }

        let parsed: InsertAllResponse = resp
            .json()
            .await
            .map_err(|e| SinkError::Transport(format!("invalid insertAll response: {e}")))?;
        if let Some(first) = parsed.insert_errors.first() {
            let message = first
                .errors
                .first()
                .map(|e| format!("row {}: {} ({})", first.index, e.message, e.reason))
                .unwrap_or_else(|| format!("row {}", first.index));
            return Err(SinkError::Rejected {
                failed: parsed.insert_errors.len(),
                message,
            });
        }

        debug!(
            "Inserted {} rows into {}{}",
            rows.len(),
            table,
            partition_hint
        );
        Ok(())
    }
}
