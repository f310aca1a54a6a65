//! Speech synthesis with espeak-ng, played back through rodio.
//!
//! espeak-ng renders each utterance to a WAV file, which is decoded with
//! hound and appended to a rodio Sink. Playback is polled on a blocking
//! thread so cancellation stops the sink immediately.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{PlaybackOutcome, Synthesizer, Utterance, Voice};
use crate::config::SpeechConfig;
use crate::error::CapabilityError;

/// espeak-ng defaults that `rate` and `pitch` scale.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;

const PLAYBACK_POLL: Duration = Duration::from_millis(50);

pub struct EspeakSynthesizer {
    command: String,
    // Kept alive for the process lifetime
    output_stream: OutputStream,
    active_sink: Arc<Mutex<Option<Sink>>>,
    renders: AtomicU64,
}

impl EspeakSynthesizer {
    /// Check that espeak-ng runs and open the default audio output.
    pub async fn new(config: &SpeechConfig) -> Result<Self, CapabilityError> {
        let version = Command::new(&config.command)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                CapabilityError::SynthesisUnavailable(format!("cannot run {}: {e}", config.command))
            })?;
        info!(
            "Speech synthesis: {}",
            String::from_utf8_lossy(&version.stdout).trim()
        );

        let output_stream = OutputStreamBuilder::open_default_stream().map_err(|e| {
            CapabilityError::SynthesisUnavailable(format!("failed to open audio output: {e}"))
        })?;

        Ok(Self {
            command: config.command.clone(),
            output_stream,
            active_sink: Arc::new(Mutex::new(None)),
            renders: AtomicU64::new(0),
        })
    }

    fn next_wav_path(&self) -> PathBuf {
        let n = self.renders.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("hamsah-{}-{n}.wav", std::process::id()))
    }

    /// Render `utterance` to WAV bytes. `None` if cancelled mid-render.
    async fn render(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, CapabilityError> {
        let path = self.next_wav_path();
        let voice = utterance
            .voice
            .as_ref()
            .map(|v| v.language.clone())
            .unwrap_or_else(|| utterance.language.to_ascii_lowercase());

        let mut child = Command::new(&self.command)
            .args(espeak_args(utterance, &voice))
            .arg("-w")
            .arg(&path)
            .arg("--")
            .arg(&utterance.text)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CapabilityError::SynthesisUnavailable(format!("cannot run {}: {e}", self.command)))?;

        let t0 = Instant::now();
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
            status = child.wait() => status,
        };

        let status = status
            .map_err(|e| CapabilityError::SynthesisUnavailable(format!("{} failed: {e}", self.command)))?;
        if !status.success() {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(CapabilityError::SynthesisUnavailable(format!(
                "{} exited with {status} for voice '{voice}'",
                self.command
            )));
        }

        let bytes = tokio::fs::read(&path).await;
        let _ = tokio::fs::remove_file(&path).await;
        let bytes = bytes
            .map_err(|e| CapabilityError::SynthesisUnavailable(format!("failed to read rendered audio: {e}")))?;

        debug!("Rendered {} bytes in {}ms", bytes.len(), t0.elapsed().as_millis());
        Ok(Some(bytes))
    }
}

#[async_trait]
impl Synthesizer for EspeakSynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>, CapabilityError> {
        let output = Command::new(&self.command)
            .arg("--voices")
            .output()
            .await
            .map_err(|e| CapabilityError::SynthesisUnavailable(format!("cannot run {}: {e}", self.command)))?;
        Ok(parse_voices(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn play(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
    ) -> Result<PlaybackOutcome, CapabilityError> {
        let Some(wav) = self.render(utterance, cancel).await? else {
            return Ok(PlaybackOutcome::Cancelled);
        };
        let source = decode_wav(&wav)?;

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(self.output_stream.mixer());
        sink.set_volume(utterance.volume);
        sink.append(source);
        *self.active_sink.lock().unwrap() = Some(sink);

        let active_sink = Arc::clone(&self.active_sink);
        let cancel = cancel.clone();
        let cancelled = tokio::task::spawn_blocking(move || loop {
            let is_empty = match active_sink.lock().unwrap().as_ref() {
                Some(s) => s.empty(),
                None => true,
            };
            if is_empty {
                return false;
            }

            if cancel.is_cancelled() {
                if let Some(sink) = active_sink.lock().unwrap().take() {
                    sink.stop();
                }
                return true;
            }

            std::thread::sleep(PLAYBACK_POLL);
        })
        .await
        .unwrap_or(false);

        *self.active_sink.lock().unwrap() = None;

        Ok(if cancelled {
            PlaybackOutcome::Cancelled
        } else {
            PlaybackOutcome::Finished
        })
    }
}

fn espeak_args(utterance: &Utterance, voice: &str) -> Vec<String> {
    let words_per_minute = (BASE_WORDS_PER_MINUTE * utterance.rate).round().clamp(80.0, 500.0);
    let pitch = (BASE_PITCH * utterance.pitch).round().clamp(0.0, 99.0);
    vec![
        "-v".to_string(),
        voice.to_string(),
        "-s".to_string(),
        format!("{words_per_minute}"),
        "-p".to_string(),
        format!("{pitch}"),
    ]
}

/// Parse `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  ar              --/M      Arabic             sem/ar
/// ```
fn parse_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [_pty, language, _age_gender, name, ..] => Some(Voice::new(*name, *language)),
                _ => None,
            }
        })
        .collect()
}

fn decode_wav(bytes: &[u8]) -> Result<SamplesBuffer, CapabilityError> {
    let invalid = |e: hound::Error| CapabilityError::SynthesisUnavailable(format!("invalid WAV output: {e}"));

    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(invalid)?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(invalid)?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(invalid)?,
    };

    Ok(SamplesBuffer::new(spec.channels, spec.sample_rate, samples))
}
