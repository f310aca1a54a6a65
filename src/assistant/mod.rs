//! Upstream Assistants API contract.
//!
//! The conversation manager talks to the hosted assistant only through the
//! `AssistantApi` trait:
//! - `openai`: reqwest implementation of the v2 threads/runs/messages endpoints

pub mod openai;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use openai::HttpAssistantApi;

/// Failure talking to the upstream service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

/// Collapsed view of the upstream run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    /// Map an upstream status string. Unknown statuses are treated as failed;
    /// `requires_action` is failed because no tools are registered.
    pub fn from_upstream(status: &str) -> Self {
        match status {
            "queued" | "in_progress" | "cancelling" => RunStatus::Pending,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }
}

/// One polled state of an upstream run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    /// Raw upstream status, kept for logs and error messages.
    pub raw_status: String,
}

/// A message from the thread's message list, reduced to its text parts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(rename = "content", default, deserialize_with = "openai::text_parts")]
    pub text: String,
}

impl ThreadMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }
}

#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create a new conversation thread and return its id.
    async fn create_thread(&self) -> Result<String, ApiError>;

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), ApiError>;

    /// Start a run of the configured assistant on the thread.
    async fn create_run(&self, thread_id: &str) -> Result<RunState, ApiError>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, ApiError>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ApiError>;

    /// List thread messages, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<(), ApiError>;
}
