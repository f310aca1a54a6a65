//! hamsah: Arabic voice assistant for the terminal.

mod assistant;
mod config;
mod conversation;
mod error;
mod notifier;
mod service;
mod speech;
#[cfg(test)]
mod testing;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ListenMode;
use crate::speech::espeak::EspeakSynthesizer;
use crate::speech::whisper::WhisperRecognizer;
use crate::speech::{Listener, Recognizer, Speaker, SpeechGate, Synthesizer};

#[derive(Parser, Debug)]
#[command(name = "hamsah", about = "Voice assistant backed by a hosted Assistants API")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep listening after each phrase
    #[arg(long)]
    continuous: bool,

    /// Disable voice input
    #[arg(long)]
    text_only: bool,

    /// Disable voice output
    #[arg(long)]
    mute: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Suppress noisy whisper.cpp / cpal internals
    let filter = if args.verbose {
        EnvFilter::new("debug,whisper_rs=info,cpal=info,reqwest=info,hyper_util=info")
    } else {
        EnvFilter::new("info,whisper_rs=warn,cpal=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("hamsah starting");

    let mut config = config::Config::load(args.config.as_deref());
    if args.continuous {
        config.listening.mode = ListenMode::Continuous;
    }
    if args.text_only {
        config.listening.enabled = false;
    }
    if args.mute {
        config.speech.enabled = false;
    }

    let credentials = config.credentials()?;
    info!("Assistant: {}", credentials.assistant_id);
    let api = Arc::new(assistant::HttpAssistantApi::new(&config.assistant, &credentials)?);

    let notifier = notifier::Notifier::new(config.feedback.notifications);
    let gate = SpeechGate::new();
    let manager = conversation::ConversationManager::new(api, &config.assistant);
    let mut service = service::VoiceService::new(
        manager,
        gate.clone(),
        notifier.clone(),
        config.assistant.delete_thread_on_exit,
    );

    if config.speech.enabled {
        match EspeakSynthesizer::new(&config.speech).await {
            Ok(synth) => {
                let synth: Arc<dyn Synthesizer> = Arc::new(synth);
                let speaker = Speaker::new(synth, config.speech.clone(), gate.clone());
                service = service.with_speaker(Arc::new(speaker));
            }
            Err(e) => {
                notifier.notify_once("synthesis", "Voice output unavailable", &e.to_string());
            }
        }
    }

    if config.listening.enabled {
        info!("Loading Whisper model...");
        let recognizer = tokio::task::spawn_blocking({
            let config = config.clone();
            move || WhisperRecognizer::new(&config)
        })
        .await?;
        match recognizer {
            Ok(recognizer) => {
                let recognizer: Arc<dyn Recognizer> = Arc::new(recognizer);
                let listener = Listener::new(recognizer, gate.clone(), config.listening.clone());
                service = service.with_listener(listener);
            }
            Err(e) => {
                notifier.notify_once("recognition", "Voice input unavailable", &e.to_string());
            }
        }
    }

    let shutdown = service.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let (typed_tx, typed_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if typed_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
    });

    service.connect().await;
    service.run(typed_rx).await;

    Ok(())
}
