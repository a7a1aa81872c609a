//! Crate-level error type.
//!
//! Every fallible operation in the library returns [`Result`], which carries a
//! [`TrendError`]. Feed-side irregularities (unknown paths, missing
//! sub-sources) are not errors and never surface here.

use std::path::PathBuf;

/// Errors raised by the admin and consumer APIs.
#[derive(Debug, thiserror::Error)]
pub enum TrendError {
    /// A series definition was rejected (non-positive interval or capacity).
    #[error("invalid series config: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The referenced series id is not registered.
    #[error("series '{0}' not found")]
    NotFound(String),

    /// `start_series` was called on a series whose worker is already running.
    #[error("series '{0}' is already started")]
    AlreadyStarted(String),

    /// A series worker needs a tokio runtime and none is running.
    #[error("no tokio runtime available to run the series worker")]
    NoRuntime,

    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::config::AppConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl TrendError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        TrendError::InvalidConfig { field, reason: reason.into() }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TrendError>;
