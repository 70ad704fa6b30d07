// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process configuration, read from `LINEHAUL_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::batcher::BatchConfig;
use crate::connection::ConnectionConfig;
use crate::constants::{
    DEFAULT_API_TIMEOUT, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT, DEFAULT_BIGQUERY_URL,
    DEFAULT_BIND, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_LINE_LENGTH, DEFAULT_PORT, DEFAULT_QUEUE_SIZE,
};
use crate::dispatch::RetryPolicy;
use crate::errors::ConfigError;
use crate::server::ServerConfig;
use crate::sink::TableRef;
use crate::token::Credentials;

const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

/// Where the insert API bearer token comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenSource {
    Inline(String),
    File(PathBuf),
}

impl TokenSource {
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        match self {
            TokenSource::Inline(token) => Credentials::from_token(token),
            TokenSource::File(path) => Credentials::from_file(path.clone()),
        }
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Inline(_) => write!(f, "Inline(..)"),
            TokenSource::File(path) => write!(f, "File({})", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub token: Option<String>,
    pub queue_size: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    /// Deadline for each insert attempt.
    pub api_timeout: Duration,
    pub api_max_attempts: u32,
    pub max_line_length: usize,
    pub table: TableRef,
    pub bigquery_url: String,
    pub bigquery_token: TokenSource,
    pub https_proxy: Option<String>,
    pub log_level: String,
    /// How often the binary logs a metrics snapshot, in seconds.
    pub metrics_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let table = required("LINEHAUL_TABLE")?;
        let table = TableRef::parse(&table)?;
        // a token file wins over an inline token
        let bigquery_token = match required("LINEHAUL_BIGQUERY_TOKEN_FILE") {
            Ok(path) => TokenSource::File(PathBuf::from(path)),
            Err(_) => TokenSource::Inline(required("LINEHAUL_BIGQUERY_TOKEN")?),
        };

        let queue_size = parse_or("LINEHAUL_QUEUE_SIZE", DEFAULT_QUEUE_SIZE)?;
        let batch_size = parse_or("LINEHAUL_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        let api_max_attempts = parse_or("LINEHAUL_API_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        for (name, value) in [
            ("LINEHAUL_QUEUE_SIZE", queue_size),
            ("LINEHAUL_BATCH_SIZE", batch_size),
            ("LINEHAUL_API_MAX_ATTEMPTS", api_max_attempts as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    value: value.to_string(),
                });
            }
        }

        Ok(Config {
            bind: env::var("LINEHAUL_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            port: parse_or("LINEHAUL_PORT", DEFAULT_PORT)?,
            token: env::var("LINEHAUL_TOKEN").ok().filter(|t| !t.is_empty()),
            queue_size,
            batch_size,
            batch_timeout: Duration::from_secs(parse_or(
                "LINEHAUL_BATCH_TIMEOUT_SECS",
                DEFAULT_BATCH_TIMEOUT.as_secs(),
            )?),
            api_timeout: Duration::from_secs(parse_or(
                "LINEHAUL_API_TIMEOUT_SECS",
                DEFAULT_API_TIMEOUT.as_secs(),
            )?),
            api_max_attempts,
            max_line_length: parse_or("LINEHAUL_MAX_LINE_LENGTH", DEFAULT_MAX_LINE_LENGTH)?,
            table,
            bigquery_url: env::var("LINEHAUL_BIGQUERY_URL")
                .unwrap_or_else(|_| DEFAULT_BIGQUERY_URL.to_string()),
            bigquery_token,
            https_proxy: env::var("LINEHAUL_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
            log_level: env::var("LINEHAUL_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|_| "info".to_string()),
            metrics_interval_secs: parse_or(
                "LINEHAUL_METRICS_INTERVAL_SECS",
                DEFAULT_METRICS_INTERVAL_SECS,
            )?,
        })
    }

    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.bind.clone(),
            port: self.port,
            queue_size: self.queue_size,
            connection: ConnectionConfig {
                token: self.token.clone(),
                max_line_length: self.max_line_length,
            },
            batch: BatchConfig {
                batch_size: self.batch_size,
                batch_timeout: self.batch_timeout,
            },
            retry_policy: RetryPolicy {
                max_attempts: self.api_max_attempts,
                attempt_timeout: self.api_timeout,
                ..RetryPolicy::default()
            },
            table: self.table.clone(),
        }
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing { name })
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 16] = [
        "LINEHAUL_BIND",
        "LINEHAUL_PORT",
        "LINEHAUL_TOKEN",
        "LINEHAUL_QUEUE_SIZE",
        "LINEHAUL_BATCH_SIZE",
        "LINEHAUL_BATCH_TIMEOUT_SECS",
        "LINEHAUL_API_TIMEOUT_SECS",
        "LINEHAUL_API_MAX_ATTEMPTS",
        "LINEHAUL_MAX_LINE_LENGTH",
        "LINEHAUL_TABLE",
        "LINEHAUL_BIGQUERY_URL",
        "LINEHAUL_BIGQUERY_TOKEN",
        "LINEHAUL_BIGQUERY_TOKEN_FILE",
        "LINEHAUL_PROXY_HTTPS",
        "LINEHAUL_LOG_LEVEL",
        "LINEHAUL_METRICS_INTERVAL_SECS",
    ];

    fn reset_env() {
        for var in VARS {
            env::remove_var(var);
        }
        env::remove_var("HTTPS_PROXY");
        env::set_var("LINEHAUL_TABLE", "the-psf:pypi.downloads");
        env::set_var("LINEHAUL_BIGQUERY_TOKEN", "_not_a_real_token_");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env();
        let config = Config::from_env().expect("failed to load config");

        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 512);
        assert_eq!(config.token, None);
        assert_eq!(config.queue_size, 10_000);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.batch_timeout, Duration::from_secs(30));
        assert_eq!(config.api_timeout, Duration::from_secs(15));
        assert_eq!(config.api_max_attempts, 15);
        assert_eq!(config.bigquery_url, "https://bigquery.googleapis.com");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.table.to_string(), "the-psf:pypi.downloads");
        assert_eq!(
            config.bigquery_token,
            TokenSource::Inline("_not_a_real_token_".to_string())
        );
        assert_eq!(format!("{:?}", config.bigquery_token), "Inline(..)");
    }

    #[tokio::test]
    #[serial]
    async fn test_token_file() {
        reset_env();
        let path = env::temp_dir().join(format!("linehaul-config-{}", std::process::id()));
        std::fs::write(&path, "from-file\n").unwrap();
        env::set_var("LINEHAUL_BIGQUERY_TOKEN_FILE", &path);

        let config = Config::from_env().expect("failed to load config");
        assert_eq!(config.bigquery_token, TokenSource::File(path.clone()));
        let credentials = config.bigquery_token.credentials();
        assert_eq!(credentials.bearer_token().await.unwrap(), "from-file");

        env::remove_var("LINEHAUL_BIGQUERY_TOKEN");
        assert!(Config::from_env().is_ok());

        env::remove_var("LINEHAUL_BIGQUERY_TOKEN_FILE");
        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Missing {
                name: "LINEHAUL_BIGQUERY_TOKEN"
            }
        );
        std::fs::remove_file(&path).unwrap();
        reset_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        reset_env();
        env::set_var("LINEHAUL_PORT", "5140");
        env::set_var("LINEHAUL_TOKEN", "secret");
        env::set_var("LINEHAUL_BATCH_SIZE", "500");
        env::set_var("LINEHAUL_API_TIMEOUT_SECS", "5");
        env::set_var("LINEHAUL_LOG_LEVEL", "DEBUG");
        env::set_var("HTTPS_PROXY", "http://proxy:3128");

        let config = Config::from_env().expect("failed to load config");
        assert_eq!(config.port, 5140);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.https_proxy.as_deref(), Some("http://proxy:3128"));

        let server = config.server_config();
        assert_eq!(server.bind_address(), "0.0.0.0:5140");
        assert_eq!(server.batch.batch_size, 500);
        assert_eq!(server.retry_policy.attempt_timeout, Duration::from_secs(5));
        assert_eq!(server.retry_policy.max_attempts, 15);
        assert_eq!(server.connection.token.as_deref(), Some("secret"));
        reset_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        reset_env();
        env::set_var("LINEHAUL_PORT", "http");
        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid {
                name: "LINEHAUL_PORT",
                value: "http".to_string()
            }
        );

        reset_env();
        env::set_var("LINEHAUL_BATCH_SIZE", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                name: "LINEHAUL_BATCH_SIZE",
                ..
            })
        ));
        reset_env();
    }

    #[test]
    #[serial]
    fn test_missing_table() {
        reset_env();
        env::remove_var("LINEHAUL_TABLE");
        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Missing {
                name: "LINEHAUL_TABLE"
            }
        );

        env::set_var("LINEHAUL_TABLE", "downloads");
        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Table("downloads".to_string())
        );
        reset_env();
    }
}
