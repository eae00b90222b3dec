// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Error taxonomy shared by the config loader, delivery channels and publishers

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Whether a failure is worth retrying as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected to succeed on retry (timeouts, throttling, dropped sockets)
    Transient,
    /// Needs a reconnect or operator action (rejected credentials, bad destination)
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("location '{location}': {field} {reason}")]
    InvalidField {
        location: String,
        field: String,
        reason: String,
    },

    #[error("{field} {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("unknown location '{requested}' (available: {available})")]
    UnknownLocation { requested: String, available: String },

    #[error("no locations configured")]
    NoLocations,
}

impl ConfigError {
    pub(crate) fn field(location: &str, field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            location: location.to_string(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to establish a session with the ingestion endpoint
#[derive(Debug, Clone, Error)]
#[error("{kind} connection error: {message}")]
pub struct ConnectionError {
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Transient, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Fatal, message: message.into() }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// Failure to get a single message acknowledged
#[derive(Debug, Clone, Error)]
#[error("{kind} delivery error: {message}")]
pub struct DeliveryError {
    pub kind: FailureKind,
    pub message: String,
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Transient, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Fatal, message: message.into() }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}
