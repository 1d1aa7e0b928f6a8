//! Error types for the feedclock library.
//!
//! Library operations return [`FeedError`]; application entry points (the
//! engine's `run` loop, config loading, binaries) wrap it in `anyhow`.

use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while feeding a playback session.
///
/// None of these are fatal to a running session: transport-side variants are
/// recovered by skipping the batch and retrying on the next fetch tick.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The transport could not complete the request.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The transport answered, but the payload was not a valid feed response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The session was constructed with an unusable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::MalformedResponse(err.to_string())
    }
}

/// A configuration value that would make the synchronization math meaningless
/// (division by zero, runaway warp, inverted caps).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("`{field}` must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },

    #[error("`hard_backlog_secs` ({hard}) must not be below `soft_backlog_secs` ({soft})")]
    InvertedBacklogCaps { soft: f64, hard: f64 },
}

impl ConfigError {
    pub(crate) fn out_of_range(field: &'static str, expected: &'static str, value: f64) -> Self {
        ConfigError::OutOfRange {
            field,
            expected,
            value,
        }
    }
}
