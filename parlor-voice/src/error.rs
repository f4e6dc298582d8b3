//! Error types for parlor-voice
//!
//! Defines the service error taxonomy using thiserror. Backend-level failures
//! are absorbed by the synthesis fallback loop and never reach callers as
//! errors; the variants here are what callbacks and tickets observe.

use parlor_common::Channel;
use thiserror::Error;

/// Main error type for parlor-voice
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Caller used a disabled service (fails fast, before any allocation)
    #[error("Voice service is disabled")]
    ServiceDisabled,

    /// Backend failed its health probe
    #[error("Backend unhealthy: {0}")]
    BackendUnhealthy(String),

    /// Synthesis time budget exhausted
    #[error("Synthesis timed out after {0} ms")]
    SynthesisTimeout(u64),

    /// Every backend failed or the budget ran out; no audio is available
    #[error("No synthesis backend produced audio: {0}")]
    SynthesisUnavailable(String),

    /// Backend transport or protocol failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Malformed or unsupported audio payload
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Output device/graph refused to start a voice
    #[error("Playback start failed: {0}")]
    PlaybackStart(String),

    /// Item was still queued when its channel was stopped
    #[error("Interrupted: queued item on channel {0} was stopped before it could play")]
    Interrupted(Channel),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<parlor_common::Error> for Error {
    fn from(err: parlor_common::Error) -> Self {
        match err {
            parlor_common::Error::InvalidInput(msg) => Error::BadRequest(msg),
            other => Error::Config(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

/// Convenience Result type using parlor-voice Error
pub type Result<T> = std::result::Result<T, Error>;
