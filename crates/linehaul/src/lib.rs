// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming ingestion of syslog-framed download events.
//!
//! Connections deliver newline-delimited syslog lines. Each line is decoded into a
//! [`event::Download`], pushed through a bounded [`queue`], grouped by the [`batcher`] into
//! per-day sub-batches and shipped to a [`sink::Sink`] by the retrying [`dispatch`] layer.
//! The [`server::Server`] ties the listener and the batcher to one lifetime.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod bigquery;
pub mod config;
pub mod connection;
pub mod constants;
pub mod decoder;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod framer;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod sink;
pub mod syslog;
pub mod token;
