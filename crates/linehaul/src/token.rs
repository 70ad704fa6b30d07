// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bearer credentials for the insert API.
//!
//! A token is either given inline or read from a file (typically a mounted secret). The file
//! is read on the first insert and the result is kept for the life of the process.

use std::path::PathBuf;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::sink::SinkError;

pub enum Credentials {
    Token(String),
    TokenFile {
        path: PathBuf,
        cached: OnceCell<String>,
    },
}

impl Credentials {
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        Credentials::Token(token.to_string())
    }

    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Credentials::TokenFile {
            path: path.into(),
            cached: OnceCell::new(),
        }
    }

    /// Returns the bearer token, reading the token file if it has not been read yet.
    ///
    /// An unreadable or empty file is not cached, so the next insert tries again.
    pub async fn bearer_token(&self) -> Result<&str, SinkError> {
        match self {
            Credentials::Token(token) => Ok(token),
            Credentials::TokenFile { path, cached } => cached
                .get_or_try_init(|| async {
                    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
                        SinkError::Credentials(format!("cannot read {}: {e}", path.display()))
                    })?;
                    let token = contents.trim();
                    if token.is_empty() {
                        return Err(SinkError::Credentials(format!(
                            "{} is empty",
                            path.display()
                        )));
                    }
                    debug!("Loaded bearer token from {}", path.display());
                    Ok(token.to_string())
                })
                .await
                .map(String::as_str),
        }
    }
}

// Never print the token itself.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => write!(f, "Credentials::Token(..)"),
            Credentials::TokenFile { path, .. } => {
                write!(f, "Credentials::TokenFile({})", path.display())
            }
        }
    }
}
