//! Error types for the voice assistant.
//!
//! Upstream failures never escape a turn: the manager converts them into
//! `TurnError` after appending the fallback reply. `CapabilityError` is
//! reported once and degrades the service to text-only input or output.

use thiserror::Error;

use crate::assistant::ApiError;

/// The conversation thread could not be created.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("assistant rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("could not create assistant thread: {0}")]
    Upstream(ApiError),
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { message, .. } => SessionError::Unauthorized(message),
            other => SessionError::Upstream(other),
        }
    }
}

/// A user turn did not produce an assistant reply.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("message cannot be empty")]
    EmptyInput,

    #[error("assistant request failed: {0}")]
    Upstream(#[from] ApiError),

    #[error("assistant run {run_id} ended with status '{status}'")]
    RunFailed { run_id: String, status: String },

    #[error("assistant run did not complete within {0}s")]
    Timeout(u64),

    #[error("turn was cancelled")]
    Cancelled,

    #[error("assistant run completed without a text reply")]
    EmptyReply,
}

/// Speech recognition or synthesis is not available on this machine.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("no synthesis voices became available within {0}ms")]
    NoVoices(u64),
}

/// Startup configuration is incomplete.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {what}: set {env} or assistant.{key} in config.yaml")]
    MissingSecret {
        what: &'static str,
        env: &'static str,
        key: &'static str,
    },
}
