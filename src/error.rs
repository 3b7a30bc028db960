//! Error types for the intervention loop.

use thiserror::Error;

/// Rejection of a malformed inbound event at the collector boundary.
///
/// Returned before any rolling window is touched.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("{family} event is missing required field `{field}`")]
    MissingField {
        family: &'static str,
        field: &'static str,
    },

    #[error("{family} event field `{field}` is out of range: {value}")]
    OutOfRange {
        family: &'static str,
        field: &'static str,
        value: f64,
    },
}

/// Failure of a single detector during an evaluation pass.
#[derive(Debug, Error, PartialEq)]
pub enum DetectorError {
    #[error("{detector}: invalid threshold `{name}` ({value})")]
    InvalidThreshold {
        detector: &'static str,
        name: &'static str,
        value: f64,
    },

    #[error("{detector}: produced non-finite confidence")]
    NonFiniteConfidence { detector: &'static str },
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Crate-level errors.
#[derive(Debug, Error)]
pub enum NudgeError {
    #[error("state database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown intervention decision '{0}'")]
    UnknownDecision(String),

    #[error("decision '{id}' already has response '{existing}'")]
    ResponseConflict { id: String, existing: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = NudgeError> = std::result::Result<T, E>;
