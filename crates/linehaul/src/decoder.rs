// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns one framed line into a download event.

use tracing::debug;

use crate::errors::ParseError;
use crate::event::{self, Download};
use crate::syslog;

/// Decodes a single line, returning `None` for anything that is not a valid event.
///
/// Malformed input is expected on this path and never escapes as an error.
pub fn parse_line(line: &[u8], token: Option<&str>) -> Option<Download> {
    match decode(line, token) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping line: {}", e);
            None
        }
    }
}

fn decode(line: &[u8], token: Option<&str>) -> Result<Download, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;

    // TODO: use a constant time comparison if the token ever guards more than ingestion
    let line = match token {
        Some(token) => line.strip_prefix(token).ok_or(ParseError::TokenMismatch)?,
        None => line,
    };

    let msg = syslog::parse(line)?;
    event::parse(&msg.message)
}
