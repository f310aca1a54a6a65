//! Utterance stream over a `Recognizer`.
//!
//! Single-shot mode runs one recognition session. Continuous mode restarts
//! after each session, throttled by `restart_delay_ms` and bounded by
//! `max_restarts`. Either mode stops on `Listener::stop()`, and `start()`
//! begins a fresh sequence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Recognizer, SpeechGate};
use crate::config::{ListenMode, ListeningConfig};
use crate::error::CapabilityError;

/// Receiving end of a listening sequence.
///
/// Yields recognized text. A `CapabilityError` is yielded at most once and
/// ends the sequence.
pub struct Utterances {
    rx: mpsc::Receiver<Result<String, CapabilityError>>,
}

impl Utterances {
    pub async fn next(&mut self) -> Option<Result<String, CapabilityError>> {
        self.rx.recv().await
    }
}

pub struct Listener {
    recognizer: Arc<dyn Recognizer>,
    gate: SpeechGate,
    config: ListeningConfig,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new(recognizer: Arc<dyn Recognizer>, gate: SpeechGate, config: ListeningConfig) -> Self {
        Self {
            recognizer,
            gate,
            config,
            cancel: None,
            task: None,
        }
    }

    /// Start a new listening sequence, stopping any previous one.
    pub fn start(&mut self) -> Utterances {
        self.stop();

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(listen_loop(
            Arc::clone(&self.recognizer),
            self.gate.clone(),
            self.config.clone(),
            cancel.clone(),
            tx,
        )));
        self.cancel = Some(cancel);

        info!("Listening ({:?} mode)", self.config.mode);
        Utterances { rx }
    }

    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.task = None;
    }

}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn listen_loop(
    recognizer: Arc<dyn Recognizer>,
    gate: SpeechGate,
    config: ListeningConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<String, CapabilityError>>,
) {
    let restart_delay = Duration::from_millis(config.restart_delay_ms);
    let mut restarts = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = gate.wait_open() => {}
        }

        let session = cancel.child_token();
        let recognition = recognizer.recognize(&session);
        tokio::pin!(recognition);

        let result = tokio::select! {
            result = &mut recognition => result,
            _ = gate.wait_closed() => {
                debug!("Speech gate closed, abandoning capture");
                session.cancel();
                let _ = recognition.await;
                Ok(None)
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(Some(text)) => {
                debug!("Recognized: \"{text}\"");
                if tx.send(Ok(text)).await.is_err() {
                    break;
                }
            }
            Ok(None) => debug!("Recognition session ended without speech"),
            Err(e) => {
                warn!("{e}");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }

        if config.mode == ListenMode::Single {
            break;
        }
        if restarts >= config.max_restarts {
            info!("Continuous listening paused after {restarts} restarts");
            break;
        }
        restarts += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(restart_delay) => {}
        }
    }

    debug!("Listener finished");
}
