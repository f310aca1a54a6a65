//! Configuration management for hamsah.
//!
//! Loads config from YAML files in standard locations. Secrets (API key and
//! assistant id) may also come from the environment, which wins over the file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub api_base: String,
    pub api_key: String,
    pub assistant_id: String,
    pub beta_header: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub run_timeout_secs: u64,
    pub delete_thread_on_exit: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            assistant_id: String::new(),
            beta_header: "assistants=v2".into(),
            request_timeout_secs: 30,
            poll_interval_ms: 2000,
            run_timeout_secs: 120,
            delete_thread_on_exit: true,
        }
    }
}

impl AssistantConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    /// Stop after one recognition session.
    #[default]
    Single,
    /// Restart after each session, throttled and bounded.
    Continuous,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListeningConfig {
    pub enabled: bool,
    pub mode: ListenMode,
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ListenMode::Single,
            max_restarts: 200,
            restart_delay_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub model: String,
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "large-v3-turbo".into(),
            language: "ar".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub threshold: f32,
    pub duration: f64,
    pub min_speech_duration: f64,
    pub max_recording_duration: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration: 1.5,
            min_speech_duration: 0.5,
            max_recording_duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub command: String,
    pub arabic_language: String,
    pub default_language: String,
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
    pub voice_wait_ms: u64,
    pub voice_poll_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "espeak-ng".into(),
            arabic_language: "ar-SA".into(),
            default_language: "en-US".into(),
            volume: 1.0,
            rate: 1.0,
            pitch: 1.0,
            voice_wait_ms: 5000,
            voice_poll_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assistant: AssistantConfig,
    pub listening: ListeningConfig,
    pub whisper: WhisperConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub speech: SpeechConfig,
    pub feedback: FeedbackConfig,
}

/// Upstream secrets, resolved from the environment or the config file.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub assistant_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("assistant_id", &self.assistant_id)
            .finish()
    }
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/hamsah/config.yaml
    /// 3. /etc/hamsah/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/hamsah/config.yaml")),
                Some(PathBuf::from("/etc/hamsah/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    /// Resolve secrets from the process environment, falling back to the file.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        self.credentials_from(|name| std::env::var(name).ok())
    }

    fn credentials_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Credentials, ConfigError> {
        let pick = |envs: [&str; 2], file: &str| {
            envs.iter()
                .filter_map(|name| lookup(name))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
                .or_else(|| Some(file.trim().to_string()).filter(|v| !v.is_empty()))
        };

        let api_key = pick(["HAMSAH_API_KEY", "OPENAI_API_KEY"], &self.assistant.api_key)
            .ok_or(ConfigError::MissingSecret {
                what: "API key",
                env: "HAMSAH_API_KEY",
                key: "api_key",
            })?;
        let assistant_id = pick(
            ["HAMSAH_ASSISTANT_ID", "OPENAI_ASSISTANT_ID"],
            &self.assistant.assistant_id,
        )
        .ok_or(ConfigError::MissingSecret {
            what: "assistant id",
            env: "HAMSAH_ASSISTANT_ID",
            key: "assistant_id",
        })?;

        Ok(Credentials {
            api_key,
            assistant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::parse(
            "assistant:\n  poll_interval_ms: 500\nlistening:\n  mode: continuous\n",
        )
        .unwrap();
        assert_eq!(config.assistant.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.assistant.run_timeout_secs, 120);
        assert_eq!(config.assistant.beta_header, "assistants=v2");
        assert_eq!(config.listening.mode, ListenMode::Continuous);
        assert_eq!(config.listening.max_restarts, 200);
        assert_eq!(config.speech.arabic_language, "ar-SA");
        assert_eq!(config.whisper.language, "ar");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.listening.mode, ListenMode::Single);
        assert!(config.speech.enabled);
    }

    #[test]
    fn test_unknown_listen_mode_is_rejected() {
        assert!(Config::parse("listening:\n  mode: forever\n").is_err());
    }

    #[test]
    fn test_env_credentials_override_file() {
        let mut config = Config::default();
        config.assistant.api_key = "file-key".into();
        config.assistant.assistant_id = "asst_file".into();

        let env: HashMap<&str, &str> =
            [("OPENAI_API_KEY", "env-key"), ("HAMSAH_ASSISTANT_ID", "asst_env")].into();
        let creds = config
            .credentials_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(creds.api_key, "env-key");
        assert_eq!(creds.assistant_id, "asst_env");
    }

    #[test]
    fn test_hamsah_env_wins_over_openai_env() {
        let config = Config::default();
        let env: HashMap<&str, &str> = [
            ("HAMSAH_API_KEY", "hamsah-key"),
            ("OPENAI_API_KEY", "openai-key"),
            ("OPENAI_ASSISTANT_ID", "asst_1"),
        ]
        .into();
        let creds = config
            .credentials_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(creds.api_key, "hamsah-key");
    }

    #[test]
    fn test_blank_secrets_are_missing() {
        let mut config = Config::default();
        config.assistant.api_key = "  ".into();
        let err = config.credentials_from(|_| None).unwrap_err();
        assert!(err.to_string().contains("HAMSAH_API_KEY"));

        config.assistant.api_key = "k".into();
        let err = config.credentials_from(|_| None).unwrap_err();
        assert!(err.to_string().contains("HAMSAH_ASSISTANT_ID"));
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = Credentials {
            api_key: "sk-secret".into(),
            assistant_id: "asst_1".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("asst_1"));
    }
}
