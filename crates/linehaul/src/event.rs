// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Download events carried in the syslog message body.
//!
//! Two payload layouts are accepted, both `|` separated:
//!
//! ```text
//! download|<timestamp>|<country>|<url>|<tls protocol>|<tls cipher>|<user agent>
//! 2@<timestamp>|<country>|<url>|<tls protocol>|<tls cipher>|<project>|<version>|<type>|<user agent>
//! ```
//!
//! The first layout carries no package metadata, so project, version and package type are
//! inferred from the requested filename.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::errors::ParseError;

const V1_PREFIX: &str = "download|";
const V2_PREFIX: &str = "2@";
const V1_FIELDS: usize = 6;
const V2_FIELDS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Download {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub file: File,
    pub tls_protocol: Option<String>,
    pub tls_cipher: Option<String>,
    pub country_code: Option<String>,
    pub details: Details,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct File {
    pub filename: String,
    pub project: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub package_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Details {
    pub user_agent: Option<String>,
}

impl Download {
    /// Unstructured form of the event as sent to the sink.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Writes a timestamp as fractional seconds since the Unix epoch.
pub fn serialize_timestamp<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(timestamp.timestamp_micros() as f64 / 1_000_000.0)
}

/// Parses the body of a syslog message into a download event.
pub fn parse(message: &str) -> Result<Download, ParseError> {
    if let Some(body) = message.strip_prefix(V1_PREFIX) {
        let fields = split_fields(body, V1_FIELDS)?;
        let url = parse_url(fields[2])?;
        let file = infer_file(filename(&url)?);
        Ok(Download {
            timestamp: parse_timestamp(fields[0])?,
            country_code: optional(fields[1]),
            url,
            tls_protocol: optional(fields[3]),
            tls_cipher: optional(fields[4]),
            file,
            details: Details {
                user_agent: optional(fields[5]),
            },
        })
    } else if let Some(body) = message.strip_prefix(V2_PREFIX) {
        let fields = split_fields(body, V2_FIELDS)?;
        let url = parse_url(fields[2])?;
        let file = File {
            filename: filename(&url)?.to_string(),
            project: optional(fields[5]),
            version: optional(fields[6]),
            package_type: optional(fields[7]),
        };
        Ok(Download {
            timestamp: parse_timestamp(fields[0])?,
            country_code: optional(fields[1]),
            url,
            tls_protocol: optional(fields[3]),
            tls_cipher: optional(fields[4]),
            file,
            details: Details {
                user_agent: optional(fields[8]),
            },
        })
    } else {
        let version = message.split(['|', '@']).next().unwrap_or_default();
        Err(ParseError::UnknownVersion(version.to_string()))
    }
}

// The last field is free-form and may itself contain `|`.
fn split_fields(body: &str, expected: usize) -> Result<Vec<&str>, ParseError> {
    let fields: Vec<&str> = body.splitn(expected, '|').collect();
    if fields.len() != expected {
        return Err(ParseError::FieldCount {
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

fn optional(field: &str) -> Option<String> {
    let field = field.trim();
    if field.is_empty() || field == "(null)" {
        None
    } else {
        Some(field.to_string())
    }
}

/// Accepts RFC 2822 (`Fri, 20 Jul 2018 02:19:20 GMT`) and RFC 3339 timestamps.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ParseError::Timestamp(value.to_string()))
}

fn parse_url(value: &str) -> Result<String, ParseError> {
    let value = value.trim();
    if !value.starts_with('/') {
        return Err(ParseError::Url(value.to_string()));
    }
    Ok(value.to_string())
}

fn filename(url: &str) -> Result<&str, ParseError> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ParseError::Url(url.to_string())),
    }
}

/// Derives project, version and package type from a distribution filename.
pub fn infer_file(filename: &str) -> File {
    let mut file = File {
        filename: filename.to_string(),
        project: None,
        version: None,
        package_type: None,
    };

    if let Some((stem, package_type)) = filename
        .strip_suffix(".whl")
        .map(|stem| (stem, "bdist_wheel"))
        .or_else(|| filename.strip_suffix(".egg").map(|stem| (stem, "bdist_egg")))
    {
        let mut parts = stem.splitn(3, '-');
        file.project = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        file.version = parts.next().filter(|v| !v.is_empty()).map(str::to_string);
        file.package_type = Some(package_type.to_string());
        return file;
    }

    for suffix in [".tar.gz", ".tar.bz2", ".tgz", ".zip"] {
        if let Some(stem) = filename.strip_suffix(suffix) {
            if let Some((project, version)) = stem.rsplit_once('-') {
                if !project.is_empty() && !version.is_empty() {
                    file.project = Some(project.to_string());
                    file.version = Some(version.to_string());
                }
            }
            file.package_type = Some("sdist".to_string());
            return file;
        }
    }

    if filename.ends_with(".exe") {
        file.package_type = Some("bdist_wininst".to_string());
    } else if filename.ends_with(".msi") {
        file.package_type = Some("bdist_msi".to_string());
    }
    file
}
