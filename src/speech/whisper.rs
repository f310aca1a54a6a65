//! Local speech recognition: microphone capture + Whisper (whisper-rs).
//!
//! The GGML model is loaded once at startup. Each recognition session opens
//! the input stream on a blocking thread, captures until silence, then
//! transcribes on another blocking thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::recorder::AudioRecorder;
use super::Recognizer;
use crate::config::{AudioConfig, Config, SilenceConfig, WhisperConfig};
use crate::error::CapabilityError;

/// How often the capture loop checks for auto-stop and cancellation.
const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// WhisperContext is Send + Sync, so one loaded model is shared across sessions.
#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    pub fn load(config: &WhisperConfig) -> Result<Self, String> {
        let model_path = find_model(&config.model)?;
        let model_str = model_path
            .to_str()
            .ok_or_else(|| format!("Model path is not valid UTF-8: {}", model_path.display()))?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let ctx = WhisperContext::new_with_params(model_str, WhisperContextParameters::default())
            .map_err(|e| format!("Failed to load Whisper model: {e}"))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Transcribe f32 samples (16kHz mono) to text.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String, String> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| format!("Failed to create whisper state: {e}"))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| format!("Whisper inference failed: {e}"))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let Ok(segment_text) = segment.to_str_lossy() else {
                continue;
            };
            let trimmed = segment_text.trim();
            if !trimmed.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(trimmed);
            }
        }

        let audio_secs = samples.len() as f64 / 16000.0;
        info!(
            "Transcribed {:.1}s audio in {}ms: \"{}\"",
            audio_secs,
            t0.elapsed().as_millis(),
            preview(&text, 80)
        );

        Ok(text)
    }
}

pub struct WhisperRecognizer {
    transcriber: WhisperTranscriber,
    audio: AudioConfig,
    silence: SilenceConfig,
}

impl WhisperRecognizer {
    /// Load the model and check for a microphone. Either failing means
    /// recognition is unavailable on this machine.
    pub fn new(config: &Config) -> Result<Self, CapabilityError> {
        let device = AudioRecorder::probe_input().map_err(CapabilityError::RecognitionUnavailable)?;
        info!("Using audio device: {device}");

        let transcriber =
            WhisperTranscriber::load(&config.whisper).map_err(CapabilityError::RecognitionUnavailable)?;

        Ok(Self {
            transcriber,
            audio: config.audio.clone(),
            silence: config.silence.clone(),
        })
    }
}

#[async_trait]
impl Recognizer for WhisperRecognizer {
    async fn recognize(&self, cancel: &CancellationToken) -> Result<Option<String>, CapabilityError> {
        let audio = self.audio.clone();
        let silence = self.silence.clone();
        let capture_cancel = cancel.clone();

        let samples = tokio::task::spawn_blocking(move || capture(audio, silence, &capture_cancel))
            .await
            .map_err(|e| CapabilityError::RecognitionUnavailable(format!("capture task failed: {e}")))??;

        let Some(samples) = samples else {
            return Ok(None);
        };
        if samples.is_empty() || AudioRecorder::is_silent(&samples, self.silence.threshold) {
            debug!("Captured audio is silent");
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let transcriber = self.transcriber.clone();
        let result = tokio::task::spawn_blocking(move || transcriber.transcribe(&samples))
            .await
            .map_err(|e| CapabilityError::RecognitionUnavailable(format!("transcription task failed: {e}")))?;

        match result {
            Ok(text) if is_speech(&text) => Ok(Some(text)),
            Ok(text) => {
                debug!("Discarding non-speech transcript: \"{text}\"");
                Ok(None)
            }
            Err(e) => {
                warn!("{e}");
                Ok(None)
            }
        }
    }
}

/// Capture one phrase. `None` if cancelled before auto-stop.
fn capture(
    audio: AudioConfig,
    silence: SilenceConfig,
    cancel: &CancellationToken,
) -> Result<Option<Vec<f32>>, CapabilityError> {
    let mut recorder = AudioRecorder::new(audio, silence);
    recorder
        .open_stream()
        .map_err(CapabilityError::RecognitionUnavailable)?;
    recorder.start();

    while !recorder.should_auto_stop() {
        if cancel.is_cancelled() {
            recorder.stop();
            return Ok(None);
        }
        std::thread::sleep(CAPTURE_POLL);
    }

    Ok(Some(recorder.stop()))
}

/// Whisper emits bracketed markers such as `[BLANK_AUDIO]` or `(music)` for
/// non-speech input.
fn is_speech(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    let bracketed = |open: char, close: char| text.starts_with(open) && text.ends_with(close);
    !(bracketed('[', ']') || bracketed('(', ')') || bracketed('*', '*'))
}

fn find_model(model_name: &str) -> Result<PathBuf, String> {
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filenames = [
        format!("ggml-{}.bin", model_name.replace('/', "-")),
        "ggml-large-v3-turbo.bin".to_string(),
        "ggml-large-v3.bin".to_string(),
        "ggml-medium.bin".to_string(),
        "ggml-base.bin".to_string(),
    ];

    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
        dirs::data_dir().map(|d| d.join("hamsah")),
    ]
    .into_iter()
    .flatten()
    .collect();

    search_model(&search_dirs, &filenames).ok_or_else(|| {
        format!(
            "Whisper GGML model not found. Download a multilingual model with:\n  \
             wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-large-v3-turbo.bin\n\
             Searched in: {:?}",
            search_dirs
        )
    })
}

fn search_model(dirs: &[PathBuf], filenames: &[String]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| filenames.iter().map(move |f| dir.join(f)))
        .find(|p| p.exists())
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}
