// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline framing for a single connection.
//!
//! Syslog over TCP uses non-transparent framing (RFC 6587): every message ends with `\n`,
//! optionally preceded by `\r`. Bytes after the last newline are held until the next read.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::decoder::parse_line;
use crate::event::Download;

pub struct LineReceiver {
    buffer: BytesMut,
    token: Option<String>,
    max_line_length: usize,
    // Set while dropping the tail of an oversized line.
    discarding: bool,
    skipped: u64,
}

impl LineReceiver {
    #[must_use]
    pub fn new(token: Option<String>, max_line_length: usize) -> Self {
        LineReceiver {
            buffer: BytesMut::new(),
            token,
            max_line_length,
            discarding: false,
            skipped: 0,
        }
    }

    /// Appends `data` and lazily yields every event decoded from the complete lines now held.
    pub fn receive_data(&mut self, data: &[u8]) -> Lines<'_> {
        self.buffer.extend_from_slice(data);
        Lines { receiver: self }
    }

    /// Number of lines that were dropped so far, either oversized or undecodable.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Ends the stream. An unterminated final line is discarded; returns its length in bytes.
    pub fn close(self) -> usize {
        if self.buffer.is_empty() || self.discarding {
            return 0;
        }
        debug!(
            "Discarding {} bytes of unterminated data at end of stream",
            self.buffer.len()
        );
        self.buffer.len()
    }

    fn next_line(&mut self) -> Option<BytesMut> {
        loop {
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let mut line = self.buffer.split_to(pos + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    return Some(line);
                }
                None => {
                    if self.buffer.len() > self.max_line_length {
                        if !self.discarding {
                            warn!(
                                "Discarding line longer than {} bytes",
                                self.max_line_length
                            );
                            self.skipped += 1;
                            self.discarding = true;
                        }
                        self.buffer.advance(self.buffer.len());
                    }
                    return None;
                }
            }
        }
    }
}

/// Iterator over the events decoded from one call to [`LineReceiver::receive_data`].
pub struct Lines<'a> {
    receiver: &'a mut LineReceiver,
}

impl Iterator for Lines<'_> {
    type Item = Download;

    fn next(&mut self) -> Option<Download> {
        while let Some(line) = self.receiver.next_line() {
            match parse_line(&line, self.receiver.token.as_deref()) {
                Some(event) => return Some(event),
                None => self.receiver.skipped += 1,
            }
        }
        None
    }
}
