//! Microphone capture with cpal.
//!
//! Captures 16kHz mono f32 audio suitable for Whisper and auto-stops after
//! a stretch of silence once the speaker has had a chance to start.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SilenceConfig};

pub struct AudioRecorder {
    config: AudioConfig,
    silence_config: SilenceConfig,
    /// Shared between the audio callback thread and the capture loop.
    shared: Arc<Mutex<CaptureState>>,
    _stream: Option<Stream>,
}

struct CaptureState {
    is_recording: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    silence_start: Option<Instant>,
    recording_start: Option<Instant>,
    should_auto_stop: bool,
}

impl AudioRecorder {
    pub fn new(audio_config: AudioConfig, silence_config: SilenceConfig) -> Self {
        let max_samples =
            (silence_config.max_recording_duration * audio_config.sample_rate as f64) as usize;

        let shared = Arc::new(Mutex::new(CaptureState {
            is_recording: false,
            buffer: Vec::with_capacity(max_samples),
            max_samples,
            silence_start: None,
            recording_start: None,
            should_auto_stop: false,
        }));

        Self {
            config: audio_config,
            silence_config,
            shared,
            _stream: None,
        }
    }

    /// Check that a default input device exists without opening it.
    pub fn probe_input() -> Result<String, String> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or("No input audio device available")?;
        Ok(device.name().unwrap_or_else(|_| "unknown".into()))
    }

    pub fn open_stream(&mut self) -> Result<(), String> {
        if self._stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or("No input audio device available")?;

        debug!(
            "Using audio device: {}",
            device.name().unwrap_or("unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let shared = Arc::clone(&self.shared);
        let silence = self.silence_config.clone();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mut state = shared.lock().unwrap();
                    if state.is_recording {
                        state.ingest(data, &silence);
                    }
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| format!("Failed to build input stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start audio stream: {e}"))?;

        self._stream = Some(stream);
        Ok(())
    }

    pub fn start(&self) {
        let mut state = self.shared.lock().unwrap();
        state.buffer.clear();
        state.is_recording = true;
        state.silence_start = None;
        state.recording_start = Some(Instant::now());
        state.should_auto_stop = false;
        debug!("Capture started");
    }

    /// Stop capturing and return the samples (f32, mono).
    pub fn stop(&self) -> Vec<f32> {
        let mut state = self.shared.lock().unwrap();
        state.is_recording = false;
        let samples = std::mem::take(&mut state.buffer);
        let duration = samples.len() as f64 / self.config.sample_rate as f64;
        info!("Captured {:.1}s ({} samples)", duration, samples.len());
        samples
    }

    pub fn should_auto_stop(&self) -> bool {
        self.shared.lock().unwrap().should_auto_stop
    }

    pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
        let rms = rms_energy(samples);
        debug!("Audio RMS energy: {rms:.4} (threshold: {threshold})");
        rms < threshold
    }
}

impl CaptureState {
    fn ingest(&mut self, data: &[f32], silence: &SilenceConfig) {
        let remaining = self.max_samples.saturating_sub(self.buffer.len());
        let to_copy = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_copy]);

        if self.buffer.len() >= self.max_samples {
            info!("Max recording duration reached ({}s)", silence.max_recording_duration);
            self.is_recording = false;
            self.should_auto_stop = true;
            return;
        }

        let Some(rec_start) = self.recording_start else {
            return;
        };
        if rec_start.elapsed().as_secs_f64() < silence.min_speech_duration {
            return;
        }

        if rms_energy(data) < silence.threshold {
            let silence_start = self.silence_start.get_or_insert_with(Instant::now);
            if silence_start.elapsed().as_secs_f64() >= silence.duration {
                debug!("Silence for {}s, auto-stopping", silence.duration);
                self.should_auto_stop = true;
            }
        } else {
            self.silence_start = None;
        }
    }
}

fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
