//! Cancel-then-speak playback.
//!
//! Each `speak` call supersedes the previous one: the older utterance is
//! cancelled and must release the playback lock before the new one starts,
//! so at most one utterance plays at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::text::{detect_script, language_for, sanitize, select_voice};
use super::{PlaybackOutcome, SpeechGate, Synthesizer, Utterance, Voice};
use crate::config::SpeechConfig;
use crate::error::CapabilityError;

pub struct Speaker {
    synth: Arc<dyn Synthesizer>,
    config: SpeechConfig,
    gate: SpeechGate,
    voices: Mutex<Option<Vec<Voice>>>,
    current: Mutex<Option<CancellationToken>>,
    play_lock: AsyncMutex<()>,
    speaking: AtomicBool,
}

impl Speaker {
    pub fn new(synth: Arc<dyn Synthesizer>, config: SpeechConfig, gate: SpeechGate) -> Self {
        Self {
            synth,
            config,
            gate,
            voices: Mutex::new(None),
            current: Mutex::new(None),
            play_lock: AsyncMutex::new(()),
            speaking: AtomicBool::new(false),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Speak `text`, cancelling whatever is currently playing.
    pub async fn speak(&self, text: &str) -> Result<PlaybackOutcome, CapabilityError> {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().unwrap().replace(token.clone()) {
            previous.cancel();
        }

        let _playing = self.play_lock.lock().await;
        if token.is_cancelled() {
            return Ok(PlaybackOutcome::Cancelled);
        }

        let clean = sanitize(text);
        if clean.is_empty() {
            debug!("Nothing to speak after sanitization");
            return Ok(PlaybackOutcome::Skipped);
        }

        let language = language_for(detect_script(&clean), &self.config);
        let Some(voices) = self.wait_for_voices(&token).await? else {
            return Ok(PlaybackOutcome::Cancelled);
        };
        let voice = select_voice(&voices, &language);

        let utterance = Utterance {
            text: clean,
            language,
            voice,
            volume: self.config.volume,
            rate: self.config.rate,
            pitch: self.config.pitch,
        };

        let _hold = self.gate.hold();
        self.speaking.store(true, Ordering::Relaxed);
        info!(
            "Speaking {} chars ({}, voice: {})",
            utterance.text.chars().count(),
            utterance.language,
            utterance.voice.as_ref().map_or("default", |v| v.name.as_str())
        );
        let outcome = self.synth.play(&utterance, &token).await;
        self.speaking.store(false, Ordering::Relaxed);

        if let Ok(PlaybackOutcome::Cancelled) = outcome {
            info!("Speech cancelled");
        }
        outcome
    }

    /// Cancel the current utterance, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    /// Voices from the synthesizer, waiting for them to appear if the
    /// platform has not loaded any yet. `None` means the wait was cancelled.
    async fn wait_for_voices(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<Vec<Voice>>, CapabilityError> {
        if let Some(voices) = self.voices.lock().unwrap().clone() {
            return Ok(Some(voices));
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.voice_wait_ms);
        let poll = Duration::from_millis(self.config.voice_poll_ms.max(1));

        loop {
            let voices = self.synth.voices().await?;
            if !voices.is_empty() {
                info!("{} synthesis voices available", voices.len());
                *self.voices.lock().unwrap() = Some(voices.clone());
                return Ok(Some(voices));
            }
            if Instant::now() >= deadline {
                return Err(CapabilityError::NoVoices(self.config.voice_wait_ms));
            }

            debug!("No synthesis voices yet, deferring speech");
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSynthesizer;

    fn speaker(synth: Arc<FakeSynthesizer>) -> (Arc<Speaker>, SpeechGate) {
        let gate = SpeechGate::new();
        let speaker = Arc::new(Speaker::new(synth, SpeechConfig::default(), gate.clone()));
        (speaker, gate)
    }

    #[tokio::test(start_paused = true)]
    async fn test_arabic_reply_uses_arabic_voice() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_millis(500)));
        let (speaker, _) = speaker(synth.clone());

        assert_eq!(speaker.speak("أهلاً بك").await.unwrap(), PlaybackOutcome::Finished);
        assert_eq!(speaker.speak("Hello there").await.unwrap(), PlaybackOutcome::Finished);

        let played = synth.played.lock().unwrap().clone();
        assert_eq!(played[0].language, "ar-SA");
        assert_eq!(played[0].voice.as_ref().unwrap().name, "Arabic");
        assert_eq!(played[1].language, "en-US");
        assert_eq!(played[1].voice.as_ref().unwrap().name, "English_(America)");
        assert_eq!(played[0].volume, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_is_sanitized_before_playback() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_millis(10)));
        let (speaker, _) = speaker(synth.clone());

        speaker.speak("**مرحبا** 👋").await.unwrap();
        assert_eq!(synth.played_texts(), vec!["مرحبا"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_only_text_is_skipped() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_millis(10)));
        let (speaker, _) = speaker(synth.clone());

        assert_eq!(speaker.speak("*** 👋 ---").await.unwrap(), PlaybackOutcome::Skipped);
        assert!(synth.played_texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_speech_cancels_previous_without_overlap() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_secs(10)));
        let (speaker, _) = speaker(synth.clone());

        let started = synth.started.notified();
        let first = tokio::spawn({
            let speaker = speaker.clone();
            async move { speaker.speak("first reply").await }
        });
        started.await;
        assert!(speaker.is_speaking());

        let second = speaker.speak("second reply").await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, PlaybackOutcome::Cancelled);
        assert_eq!(second, PlaybackOutcome::Finished);
        assert_eq!(synth.played_texts(), vec!["first reply", "second reply"]);
        assert_eq!(synth.max_active.load(Ordering::SeqCst), 1);
        assert!(!speaker.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_playback() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_secs(10)));
        let (speaker, _) = speaker(synth.clone());

        let started = synth.started.notified();
        let task = tokio::spawn({
            let speaker = speaker.clone();
            async move { speaker.speak("long reply").await }
        });
        started.await;
        speaker.cancel();

        assert_eq!(task.await.unwrap().unwrap(), PlaybackOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_is_held_only_while_playing() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_secs(1)));
        let (speaker, gate) = speaker(synth.clone());

        let started = synth.started.notified();
        let task = tokio::spawn({
            let speaker = speaker.clone();
            async move { speaker.speak("hello").await }
        });
        started.await;
        assert!(!gate.is_open());

        task.await.unwrap().unwrap();
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_is_deferred_until_voices_load() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_millis(10)).with_late_voices(3));
        let (speaker, _) = speaker(synth.clone());

        let started = Instant::now();
        assert_eq!(speaker.speak("مرحبا").await.unwrap(), PlaybackOutcome::Finished);
        assert!(started.elapsed() >= Duration::from_millis(750));
        assert_eq!(synth.played_texts(), vec!["مرحبا"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_deferred_speech_plays() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_millis(10)).with_late_voices(8));
        let (speaker, _) = speaker(synth.clone());

        let first = tokio::spawn({
            let speaker = speaker.clone();
            async move { speaker.speak("first").await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(speaker.speak("second").await.unwrap(), PlaybackOutcome::Finished);
        assert_eq!(first.await.unwrap().unwrap(), PlaybackOutcome::Cancelled);
        assert_eq!(synth.played_texts(), vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_voices_gives_up_after_wait() {
        let synth = Arc::new(FakeSynthesizer::new(Duration::from_millis(10)).without_voices());
        let (speaker, _) = speaker(synth.clone());

        let err = speaker.speak("مرحبا").await.unwrap_err();
        assert!(matches!(err, CapabilityError::NoVoices(5000)));
        assert!(synth.played_texts().is_empty());
    }
}
