//! In-memory fakes for the assistant API and the speech backends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::assistant::{ApiError, AssistantApi, RunState, RunStatus, ThreadMessage};
use crate::conversation::{Transcript, TurnState, TurnStateMachine};
use crate::error::CapabilityError;
use crate::speech::{PlaybackOutcome, Recognizer, Synthesizer, Utterance, Voice};

pub const THREAD_ID: &str = "thread_test";
pub const RUN_ID: &str = "run_test";

/// Assistant API that replays scripted run statuses and a fixed reply.
#[derive(Default)]
pub struct ScriptedApi {
    statuses: Mutex<VecDeque<String>>,
    reply: Mutex<Option<String>>,
    unauthorized: bool,
    fail_post: bool,
    ignore_cancel: bool,
    cancel_requested: AtomicBool,
    active_run: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    watched: Mutex<Option<(Transcript, TurnStateMachine)>>,
    pub transcript_len_at_post: Mutex<Option<usize>>,
    pub state_while_polling: Mutex<Vec<TurnState>>,
}

impl ScriptedApi {
    /// Runs report `statuses` in order; the last one repeats. With no
    /// statuses the run stays `in_progress` forever.
    pub fn new(statuses: &[&str], reply: Option<&str>) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().map(|s| s.to_string()).collect()),
            reply: Mutex::new(reply.map(str::to_string)),
            ..Self::default()
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            unauthorized: true,
            ..Self::default()
        }
    }

    pub fn failing_post() -> Self {
        Self {
            fail_post: true,
            ..Self::default()
        }
    }

    /// Runs report `cancelling` forever once cancelled.
    pub fn ignoring_cancel(self) -> Self {
        Self {
            ignore_cancel: true,
            ..self
        }
    }

    /// Whether the last run created has not yet reported a terminal status.
    pub fn has_active_run(&self) -> bool {
        self.active_run.load(Ordering::SeqCst)
    }

    /// Record transcript length and turn state as seen from inside API calls.
    pub fn watch(&self, transcript: Transcript, state: TurnStateMachine) {
        *self.watched.lock().unwrap() = Some((transcript, state));
    }

    pub fn push_statuses(&self, statuses: &[&str]) {
        let mut queue = self.statuses.lock().unwrap();
        queue.clear();
        queue.extend(statuses.iter().map(|s| s.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn next_status(&self) -> String {
        let mut queue = self.statuses.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_else(|| "in_progress".to_string())
        }
    }
}

#[async_trait]
impl AssistantApi for ScriptedApi {
    async fn create_thread(&self) -> Result<String, ApiError> {
        self.record("create_thread");
        if self.unauthorized {
            return Err(ApiError::Unauthorized {
                status: 401,
                message: "Incorrect API key provided".to_string(),
            });
        }
        Ok(THREAD_ID.to_string())
    }

    async fn add_user_message(&self, thread_id: &str, _text: &str) -> Result<(), ApiError> {
        assert_eq!(thread_id, THREAD_ID);
        self.record("add_user_message");
        if let Some((transcript, _)) = self.watched.lock().unwrap().as_ref() {
            *self.transcript_len_at_post.lock().unwrap() = Some(transcript.len());
        }
        if self.fail_post {
            return Err(ApiError::Status {
                status: 500,
                message: "server error".to_string(),
            });
        }
        if self.has_active_run() {
            return Err(ApiError::Status {
                status: 400,
                message: "thread already has an active run".to_string(),
            });
        }
        Ok(())
    }

    async fn create_run(&self, _thread_id: &str) -> Result<RunState, ApiError> {
        self.record("create_run");
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.active_run.store(true, Ordering::SeqCst);
        Ok(RunState {
            id: RUN_ID.to_string(),
            status: RunStatus::Pending,
            raw_status: "queued".to_string(),
        })
    }

    async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<RunState, ApiError> {
        self.record("get_run");
        if let Some((_, state)) = self.watched.lock().unwrap().as_ref() {
            self.state_while_polling.lock().unwrap().push(state.current());
        }
        let raw = match (self.cancel_requested.load(Ordering::SeqCst), self.ignore_cancel) {
            (true, false) => "cancelled".to_string(),
            (true, true) => "cancelling".to_string(),
            (false, _) => self.next_status(),
        };
        let status = RunStatus::from_upstream(&raw);
        self.active_run.store(!status.is_terminal(), Ordering::SeqCst);
        Ok(RunState {
            id: run_id.to_string(),
            status,
            raw_status: raw,
        })
    }

    async fn cancel_run(&self, _thread_id: &str, _run_id: &str) -> Result<(), ApiError> {
        self.record("cancel_run");
        self.cancel_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        self.record("list_messages");
        let mut messages = Vec::new();
        if let Some(reply) = self.reply.lock().unwrap().clone() {
            messages.push(ThreadMessage {
                id: "msg_3".to_string(),
                role: "assistant".to_string(),
                run_id: Some(RUN_ID.to_string()),
                text: reply,
            });
        }
        messages.push(ThreadMessage {
            id: "msg_2".to_string(),
            role: "user".to_string(),
            run_id: None,
            text: "user text".to_string(),
        });
        messages.push(ThreadMessage {
            id: "msg_1".to_string(),
            role: "assistant".to_string(),
            run_id: Some("run_previous".to_string()),
            text: "stale reply".to_string(),
        });
        Ok(messages)
    }

    async fn delete_thread(&self, _thread_id: &str) -> Result<(), ApiError> {
        self.record("delete_thread");
        Ok(())
    }
}

/// Recognizer that returns scripted results, then reports silence.
#[derive(Default)]
pub struct ScriptedRecognizer {
    results: Mutex<VecDeque<Result<Option<String>, CapabilityError>>>,
    pub sessions: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(results: Vec<Result<Option<String>, CapabilityError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _cancel: &CancellationToken) -> Result<Option<String>, CapabilityError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}

/// Recognizer whose sessions never hear anything on their own: each one
/// stays open until its token is cancelled, then reports a phrase that the
/// listener must not deliver.
#[derive(Default)]
pub struct HangingRecognizer {
    sessions: AtomicUsize,
    cancelled: AtomicUsize,
    pub started: tokio::sync::Notify,
}

impl HangingRecognizer {
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for HangingRecognizer {
    async fn recognize(&self, cancel: &CancellationToken) -> Result<Option<String>, CapabilityError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        self.started.notify_waiters();
        cancel.cancelled().await;
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(Some("captured during playback".to_string()))
    }
}

/// Synthesizer that "plays" for a fixed duration unless cancelled.
pub struct FakeSynthesizer {
    voices: Mutex<Vec<Voice>>,
    voice_queries_until_ready: AtomicUsize,
    play_duration: Duration,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub played: Mutex<Vec<Utterance>>,
    pub started: tokio::sync::Notify,
}

impl FakeSynthesizer {
    pub fn new(play_duration: Duration) -> Self {
        Self {
            voices: Mutex::new(vec![
                Voice::new("English_(America)", "en-us"),
                Voice::new("Arabic", "ar"),
            ]),
            voice_queries_until_ready: AtomicUsize::new(0),
            play_duration,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            played: Mutex::new(Vec::new()),
            started: tokio::sync::Notify::new(),
        }
    }

    /// Report zero voices for the first `queries` calls to `voices()`.
    pub fn with_late_voices(self, queries: usize) -> Self {
        self.voice_queries_until_ready.store(queries, Ordering::SeqCst);
        self
    }

    pub fn without_voices(self) -> Self {
        self.voices.lock().unwrap().clear();
        self
    }

    pub fn played_texts(&self) -> Vec<String> {
        self.played.lock().unwrap().iter().map(|u| u.text.clone()).collect()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>, CapabilityError> {
        let pending = self.voice_queries_until_ready.load(Ordering::SeqCst);
        if pending > 0 {
            self.voice_queries_until_ready.store(pending - 1, Ordering::SeqCst);
            return Ok(Vec::new());
        }
        Ok(self.voices.lock().unwrap().clone())
    }

    async fn play(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, CapabilityError> {
        self.played.lock().unwrap().push(utterance.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started.notify_waiters();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => PlaybackOutcome::Cancelled,
            _ = tokio::time::sleep(self.play_duration) => PlaybackOutcome::Finished,
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }
}
