//! Conversation session manager.
//!
//! Drives one turn at a time through the upstream API:
//! user turn recorded -> message posted -> run created -> run polled until
//! terminal (bounded by timeout and cancellation) -> reply fetched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{Session, Transcript, Turn};
use super::state::{TurnState, TurnStateMachine};
use crate::assistant::{ApiError, AssistantApi, RunState, RunStatus, ThreadMessage};
use crate::config::AssistantConfig;
use crate::error::{SessionError, TurnError};

/// Reply recorded (and spoken) when a turn fails for any reason.
pub const FALLBACK_REPLY: &str = "حدث خطأ أثناء الاتصال بالمساعد.";

/// How long a timed-out run may take to stop after it is cancelled.
const CANCEL_SETTLE: Duration = Duration::from_secs(10);

pub struct ConversationManager {
    api: Arc<dyn AssistantApi>,
    poll_interval: Duration,
    run_timeout: Duration,
    transcript: Transcript,
    state: TurnStateMachine,
}

impl ConversationManager {
    pub fn new(api: Arc<dyn AssistantApi>, config: &AssistantConfig) -> Self {
        Self {
            api,
            poll_interval: config.poll_interval(),
            run_timeout: config.run_timeout(),
            transcript: Transcript::new(),
            state: TurnStateMachine::new(),
        }
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }

    pub fn state(&self) -> TurnStateMachine {
        self.state.clone()
    }

    /// Create the upstream thread for this session.
    pub async fn open_session(&self) -> Result<Session, SessionError> {
        let thread_id = self.api.create_thread().await?;
        info!("Session opened (thread {thread_id})");
        Ok(Session::new(thread_id))
    }

    /// Delete the upstream thread. Failures are logged and ignored.
    pub async fn close_session(&self, session: Session) {
        match self.api.delete_thread(session.thread_id()).await {
            Ok(()) => info!(
                "Session closed (thread {}, open {}s)",
                session.thread_id(),
                (Utc::now() - session.created_at()).num_seconds()
            ),
            Err(e) => warn!("Failed to delete thread {}: {e}", session.thread_id()),
        }
    }

    /// Submit a user turn and wait for the assistant's reply.
    ///
    /// The user turn is appended before any network call. On every failure
    /// path the fallback assistant turn is appended before the error is
    /// returned, so the transcript always ends with an assistant turn.
    pub async fn submit_turn(
        &mut self,
        session: &Session,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Turn, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        if self.state.current() != TurnState::Idle {
            self.state.reset();
        }
        self.advance(TurnState::Submitted);
        self.transcript.push(Turn::user(text));

        match self.run_turn(session, text, cancel).await {
            Ok(reply) => {
                let turn = Turn::assistant(reply);
                self.transcript.push(turn.clone());
                self.advance(TurnState::Completed);
                self.advance(TurnState::Idle);
                Ok(turn)
            }
            Err(err) => {
                warn!("Turn failed: {err}");
                self.transcript.push(Turn::assistant(FALLBACK_REPLY));
                self.advance(TurnState::Failed);
                self.advance(TurnState::Idle);
                Err(err)
            }
        }
    }

    async fn run_turn(
        &self,
        session: &Session,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TurnError> {
        let thread_id = session.thread_id();

        let run = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            run = async {
                self.api.add_user_message(thread_id, text).await?;
                self.api.create_run(thread_id).await
            } => run?,
        };
        debug!("Run {} created ({})", run.id, run.raw_status);
        self.advance(TurnState::Polling);

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TurnError::Cancelled),
            polled = tokio::time::timeout(self.run_timeout, self.poll_run(thread_id, run.clone())) => {
                polled.unwrap_or_else(|_| Err(TurnError::Timeout(self.run_timeout.as_secs())))
            }
        };

        let finished = match polled {
            Ok(finished) => finished,
            Err(err) => {
                match err {
                    // The thread rejects new messages until the run has stopped.
                    TurnError::Timeout(_) => self.cancel_upstream(thread_id, &run.id, true).await,
                    TurnError::Cancelled => self.cancel_upstream(thread_id, &run.id, false).await,
                    _ => {}
                }
                return Err(err);
            }
        };

        if finished.status == RunStatus::Failed {
            return Err(TurnError::RunFailed {
                run_id: finished.id,
                status: finished.raw_status,
            });
        }

        let messages = self.api.list_messages(thread_id).await?;
        select_reply(&messages, &finished.id).ok_or(TurnError::EmptyReply)
    }

    /// Poll on a fixed interval until the run reaches a terminal status.
    async fn poll_run(&self, thread_id: &str, mut run: RunState) -> Result<RunState, TurnError> {
        while !run.status.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            run = self.api.get_run(thread_id, &run.id).await?;
            debug!("Run {} status: {}", run.id, run.raw_status);
        }
        Ok(run)
    }

    /// Best-effort cancel. With `settle`, wait (bounded) until the run
    /// reports a terminal status so the thread accepts the next message.
    async fn cancel_upstream(&self, thread_id: &str, run_id: &str, settle: bool) {
        let result: Result<(), ApiError> = self.api.cancel_run(thread_id, run_id).await;
        if let Err(e) = result {
            debug!("Could not cancel run {run_id}: {e}");
            return;
        }
        if !settle {
            return;
        }

        let settled = tokio::time::timeout(CANCEL_SETTLE, async {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                match self.api.get_run(thread_id, run_id).await {
                    Ok(run) if run.status.is_terminal() => {
                        debug!("Run {run_id} stopped ({})", run.raw_status);
                        break;
                    }
                    Ok(run) => debug!("Run {run_id} still {}", run.raw_status),
                    Err(e) => {
                        debug!("Could not check cancelled run {run_id}: {e}");
                        break;
                    }
                }
            }
        })
        .await;

        if settled.is_err() {
            warn!("Run {run_id} still active {}s after cancel", CANCEL_SETTLE.as_secs());
        }
    }

    fn advance(&self, target: TurnState) {
        if let Err(e) = self.state.transition(target) {
            warn!("{e}");
        }
    }
}

/// Pick the reply for `run_id`: the newest assistant message produced by that
/// run, or the newest assistant message without a run id. Messages are
/// expected newest first.
fn select_reply(messages: &[ThreadMessage], run_id: &str) -> Option<String> {
    let assistant: Vec<&ThreadMessage> = messages
        .iter()
        .filter(|m| m.is_assistant() && !m.text.trim().is_empty())
        .collect();

    assistant
        .iter()
        .find(|m| m.run_id.as_deref() == Some(run_id))
        .or_else(|| assistant.iter().find(|m| m.run_id.is_none()))
        .map(|m| m.text.trim().to_string())
}
