// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parser for the syslog envelope wrapping each event.
//!
//! Lines look like `<134>2018-07-20T02:19:20Z cache-itm18828 linehaul[411617]: <message>`,
//! i.e. a priority, an RFC 3339 timestamp, the sending host, the application name with an
//! optional process id, and the free-form message after `": "`.

use chrono::{DateTime, Utc};

use crate::errors::ParseError;

const MAX_PRIORITY: u8 = 191;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Kernel,
    User,
    Mail,
    Daemon,
    Auth,
    Syslog,
    Printer,
    News,
    Uucp,
    Clock,
    AuthPriv,
    Ftp,
    Ntp,
    Audit,
    Alert,
    Cron,
    Local(u8),
}

impl From<u8> for Facility {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Kernel,
            1 => Self::User,
            2 => Self::Mail,
            3 => Self::Daemon,
            4 => Self::Auth,
            5 => Self::Syslog,
            6 => Self::Printer,
            7 => Self::News,
            8 => Self::Uucp,
            9 => Self::Clock,
            10 => Self::AuthPriv,
            11 => Self::Ftp,
            12 => Self::Ntp,
            13 => Self::Audit,
            14 => Self::Alert,
            15 => Self::Cron,
            n => Self::Local(n.saturating_sub(16)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Informational,
    Debug,
}

impl From<u8> for Severity {
    fn from(code: u8) -> Self {
        match code & 0x07 {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Informational,
            _ => Self::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub facility: Facility,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub appname: String,
    pub procid: Option<String>,
    pub message: String,
}

/// Parses one syslog line, without its trailing newline.
pub fn parse(line: &str) -> Result<SyslogMessage, ParseError> {
    let rest = line
        .strip_prefix('<')
        .ok_or(ParseError::Header("missing priority"))?;
    let (priority, rest) = rest
        .split_once('>')
        .ok_or(ParseError::Header("unterminated priority"))?;
    let priority = parse_priority(priority)?;

    let (timestamp, rest) = rest
        .split_once(' ')
        .ok_or(ParseError::Header("missing timestamp"))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| ParseError::Timestamp(timestamp.to_string()))?
        .with_timezone(&Utc);

    let (hostname, rest) = rest
        .split_once(' ')
        .ok_or(ParseError::Header("missing hostname"))?;
    if hostname.is_empty() {
        return Err(ParseError::Header("empty hostname"));
    }

    let (tag, message) = rest
        .split_once(": ")
        .ok_or(ParseError::Header("missing message separator"))?;
    let (appname, procid) = parse_tag(tag)?;

    Ok(SyslogMessage {
        facility: Facility::from(priority >> 3),
        severity: Severity::from(priority),
        timestamp,
        hostname: hostname.to_string(),
        appname: appname.to_string(),
        procid: procid.map(str::to_string),
        message: message.to_string(),
    })
}

fn parse_priority(value: &str) -> Result<u8, ParseError> {
    if value.is_empty() || value.len() > 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::Priority(value.to_string()));
    }
    match value.parse::<u8>() {
        Ok(priority) if priority <= MAX_PRIORITY => Ok(priority),
        _ => Err(ParseError::Priority(value.to_string())),
    }
}

// `appname` or `appname[procid]`
fn parse_tag(tag: &str) -> Result<(&str, Option<&str>), ParseError> {
    let (appname, procid) = match tag.split_once('[') {
        Some((appname, rest)) => {
            let procid = rest
                .strip_suffix(']')
                .ok_or(ParseError::Header("unterminated process id"))?;
            if procid.is_empty() {
                return Err(ParseError::Header("empty process id"));
            }
            (appname, Some(procid))
        }
        None => (tag, None),
    };
    if appname.is_empty() || appname.contains(' ') {
        return Err(ParseError::Header("invalid application name"));
    }
    Ok((appname, procid))
}
