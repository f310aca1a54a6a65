//! Speech I/O: recognition in, synthesis out.
//!
//! Components:
//! - `text`: script detection, language choice and sanitization before playback
//! - `gate`: keeps capture off while playback or a turn is in progress
//! - `listener`: single-shot / continuous utterance stream over a `Recognizer`
//! - `speaker`: cancel-then-speak playback over a `Synthesizer`
//! - `recorder` + `whisper`: microphone capture and local Whisper recognition
//! - `espeak`: espeak-ng rendering + rodio playback with cancellation

pub mod espeak;
pub mod gate;
pub mod listener;
pub mod recorder;
pub mod speaker;
pub mod text;
pub mod whisper;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CapabilityError;

pub use gate::SpeechGate;
pub use listener::{Listener, Utterances};
pub use speaker::Speaker;

/// A synthesis voice as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// BCP-47-ish language tag, e.g. `ar`, `en-us`.
    pub language: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
        }
    }
}

/// One utterance handed to the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
    pub voice: Option<Voice>,
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Cancelled,
    /// Nothing was left to say after sanitization.
    Skipped,
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Run one recognition session and return the first transcript, or
    /// `None` if nothing was heard. Must return promptly once `cancel` fires.
    async fn recognize(&self, cancel: &CancellationToken) -> Result<Option<String>, CapabilityError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Voices currently available. May be empty right after startup.
    async fn voices(&self) -> Result<Vec<Voice>, CapabilityError>;

    /// Play one utterance to completion, or stop as soon as `cancel` fires.
    async fn play(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, CapabilityError>;
}
