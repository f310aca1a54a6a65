//! Main service loop.
//!
//! IDLE → PROCESSING → IDLE
//!
//! Typed lines and recognized utterances both become user turns. While a
//! turn is in flight the speech gate is held, so nothing is captured, and
//! typed lines that pile up are discarded once the turn ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationManager, Session, Turn};
use crate::error::{CapabilityError, TurnError};
use crate::notifier::Notifier;
use crate::speech::gate::GateHold;
use crate::speech::{Listener, Speaker, SpeechGate, Utterances};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Processing,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Processing => write!(f, "PROCESSING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Listen,
    Stop,
    Quit,
    Say(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            "" => None,
            "/listen" => Some(Self::Listen),
            "/stop" => Some(Self::Stop),
            "/quit" | "/exit" => Some(Self::Quit),
            text => Some(Self::Say(text.to_string())),
        }
    }
}

pub struct VoiceService {
    manager: ConversationManager,
    session: Option<Session>,
    gate: SpeechGate,
    speaker: Option<Arc<Speaker>>,
    muted: Arc<AtomicBool>,
    speaking: Option<JoinHandle<()>>,
    listener: Option<Listener>,
    utterances: Option<Utterances>,
    notifier: Notifier,
    delete_thread_on_exit: bool,
    state: ServiceState,
    shutdown: CancellationToken,
}

impl VoiceService {
    pub fn new(
        manager: ConversationManager,
        gate: SpeechGate,
        notifier: Notifier,
        delete_thread_on_exit: bool,
    ) -> Self {
        Self {
            manager,
            session: None,
            gate,
            speaker: None,
            muted: Arc::new(AtomicBool::new(false)),
            speaking: None,
            listener: None,
            utterances: None,
            notifier,
            delete_thread_on_exit,
            state: ServiceState::Idle,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_speaker(mut self, speaker: Arc<Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Token that stops the service and cancels the in-flight turn.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Open the session up front so credential problems show at startup.
    /// A failure here is not fatal: the next input retries.
    pub async fn connect(&mut self) {
        self.ensure_session().await;
    }

    pub async fn run(&mut self, mut typed: mpsc::Receiver<String>) {
        self.start_listening();
        info!("Service ready: speak or type a message (/listen, /stop, /quit)");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Interrupted");
                    break;
                }
                line = typed.recv() => {
                    let Some(line) = line else {
                        info!("Input closed");
                        break;
                    };
                    if !self.handle_line(&line).await {
                        break;
                    }
                    discard_pending(&mut typed);
                }
                utterance = next_utterance(&mut self.utterances) => {
                    self.on_utterance(utterance).await;
                    discard_pending(&mut typed);
                }
            }
        }

        self.shutdown().await;
    }

    /// Handle one typed line. Returns `false` on `/quit`.
    async fn handle_line(&mut self, line: &str) -> bool {
        match Command::parse(line) {
            None => {}
            Some(Command::Quit) => return false,
            Some(Command::Stop) => {
                if self.stop_speaking() {
                    println!("(speech stopped)");
                }
            }
            Some(Command::Listen) => {
                if !self.start_listening() {
                    println!("(voice input is off, type your message instead)");
                }
            }
            Some(Command::Say(text)) => self.handle_input(&text).await,
        }
        true
    }

    async fn on_utterance(&mut self, utterance: Option<Result<String, CapabilityError>>) {
        match utterance {
            Some(Ok(text)) => self.handle_input(&text).await,
            Some(Err(e)) => {
                self.notifier
                    .notify_once("recognition", "Voice input unavailable", &e.to_string());
                println!("(voice input unavailable, continuing with typed input)");
                self.utterances = None;
                self.listener = None;
            }
            None => {
                debug!("Listening sequence ended");
                self.utterances = None;
                if self.listener.is_some() {
                    println!("(listening stopped, type /listen to resume)");
                }
            }
        }
    }

    /// Run one user turn end to end: print, submit, print the reply and
    /// hand it to the speaker.
    async fn handle_input(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(session) = self.ensure_session().await else {
            println!("(could not reach the assistant, message not sent)");
            return;
        };

        let hold = self.gate.hold();
        self.stop_speaking();
        self.set_state(ServiceState::Processing);
        println!("{}", format_turn(&Turn::user(text)));

        let cancel = self.shutdown.child_token();
        match self.manager.submit_turn(&session, text, &cancel).await {
            Ok(_) => {}
            Err(TurnError::EmptyInput) => {
                self.set_state(ServiceState::Idle);
                return;
            }
            Err(e) => debug!("Turn ended with fallback: {e}"),
        }

        // Failed turns record the fallback, so the newest turn is the reply
        if let Some(reply) = self.manager.transcript().last() {
            println!("{}", format_turn(&reply));
            if !self.shutdown.is_cancelled() {
                self.speak(reply.text, hold);
            }
        }
        self.set_state(ServiceState::Idle);
    }

    async fn ensure_session(&mut self) -> Option<Session> {
        if self.session.is_none() {
            match self.manager.open_session().await {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    self.notifier
                        .notify_once("session", "Assistant unavailable", &e.to_string());
                    return None;
                }
            }
        }
        self.session.clone()
    }

    /// Speak on a background task. `hold` keeps capture off until playback
    /// is over.
    fn speak(&mut self, text: String, hold: GateHold) {
        let Some(speaker) = self.speaker.clone() else {
            return;
        };
        if self.muted.load(Ordering::Relaxed) {
            return;
        }

        let notifier = self.notifier.clone();
        let muted = Arc::clone(&self.muted);
        self.speaking = Some(tokio::spawn(async move {
            match speaker.speak(&text).await {
                Ok(outcome) => debug!("Speech: {outcome:?}"),
                Err(e @ CapabilityError::SynthesisUnavailable(_)) => {
                    notifier.notify_once("synthesis", "Voice output unavailable", &e.to_string());
                    muted.store(true, Ordering::Relaxed);
                }
                Err(e) => {
                    notifier.notify_once("voices", "Voice output unavailable", &e.to_string());
                }
            }
            drop(hold);
        }));
    }

    /// Cancel playback. Returns whether anything was playing.
    fn stop_speaking(&self) -> bool {
        let Some(speaker) = &self.speaker else {
            return false;
        };
        let was_speaking = speaker.is_speaking();
        speaker.cancel();
        was_speaking
    }

    /// Start a listening sequence. Returns `false` when voice input is off.
    fn start_listening(&mut self) -> bool {
        let Some(listener) = self.listener.as_mut() else {
            debug!("Voice input disabled");
            return false;
        };
        self.utterances = Some(listener.start());
        true
    }

    fn set_state(&mut self, state: ServiceState) {
        if self.state != state {
            info!("State: {} → {}", self.state, state);
            self.state = state;
        }
    }

    /// Wait for the current utterance to finish playing.
    pub async fn wait_for_speech(&mut self) {
        if let Some(task) = self.speaking.take() {
            let _ = task.await;
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener.stop();
        }
        self.utterances = None;
        self.stop_speaking();
        self.wait_for_speech().await;

        if let Some(session) = self.session.take() {
            if self.delete_thread_on_exit {
                self.manager.close_session(session).await;
            }
        }
        let transcript = self.manager.transcript();
        if transcript.is_empty() {
            info!("Service stopped (no turns)");
        } else {
            info!(
                "Service stopped ({} turns, last turn {})",
                transcript.len(),
                self.manager.state().current()
            );
        }
    }
}

async fn next_utterance(
    utterances: &mut Option<Utterances>,
) -> Option<Result<String, CapabilityError>> {
    match utterances {
        Some(utterances) => utterances.next().await,
        None => std::future::pending().await,
    }
}

fn format_turn(turn: &Turn) -> String {
    format!("[{}] {turn}", turn.at.with_timezone(&Local).format("%H:%M:%S"))
}

/// Drop typed lines that queued up while a turn was in flight.
fn discard_pending(typed: &mut mpsc::Receiver<String>) {
    while let Ok(line) = typed.try_recv() {
        if Command::parse(&line).is_some() {
            warn!("Discarded input typed during a turn: \"{}\"", line.trim());
        }
    }
}
