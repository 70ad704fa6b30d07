// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 512;
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;
// TODO: raise to 500 once the sink quota for larger inserts is confirmed
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;
pub const DEFAULT_BACKOFF_MULTIPLIER: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Size of a single socket read.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Longest line the framer will hold before discarding it.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024;

pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com";
