//! Console runner for the voice co-pilot.
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] (defaults on first run) and apply the API key from
//!    the environment.
//! 3. Wire the live connector, cpal microphone and speaker, and the HTTP
//!    workspace into a [`Copilot`].
//! 4. Start a session and print updates until Ctrl-C or the session ends.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use voice_copilot::{
    audio::{CaptureSettings, CpalMicrophone, CpalSpeaker},
    channel::LiveConnector,
    config::{AppConfig, API_KEY_ENV},
    session::{Copilot, SessionDeps, SessionOptions, SessionStatus, SessionUpdate},
    tools::{CapabilityTable, HttpWorkspace},
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice co-pilot starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    config.override_api_key(std::env::var(API_KEY_ENV).ok());
    if config.live.api_key.is_none() {
        log::warn!("no API key configured; set {API_KEY_ENV} or live.api_key in settings.toml");
    }

    let workspace = Arc::new(HttpWorkspace::from_config(&config.workspace));
    let deps = SessionDeps {
        connector: Arc::new(LiveConnector::from_config(&config.live)),
        microphone: Arc::new(CpalMicrophone::new(CaptureSettings::from_config(
            &config.audio,
        ))),
        speaker: Arc::new(CpalSpeaker),
        capabilities: CapabilityTable::builtin(workspace),
    };

    let (mut copilot, updates) = Copilot::new(deps, SessionOptions::from_config(&config));
    let printer = tokio::spawn(print_updates(updates));

    if let Err(e) = copilot.start().await {
        eprintln!("Could not start voice session: {e}");
        drop(copilot);
        let _ = printer.await;
        return Ok(());
    }
    println!("Listening. Press Ctrl-C to stop.");

    // `wait` is cancel-safe.
    let ended = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        status = copilot.wait() => Some(status.unwrap_or_default()),
    };
    match ended {
        Some(status) => log::info!("session ended: {}", status.label()),
        None => {
            log::info!("Ctrl-C received, stopping session");
            if let Err(e) = copilot.stop().await {
                log::warn!("stop: {e}");
            }
        }
    }

    drop(copilot);
    let _ = printer.await;
    Ok(())
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Status {
                status: SessionStatus::Error,
                message,
            } => {
                eprintln!("[error] {}", message.unwrap_or_default());
            }
            SessionUpdate::Status { status, .. } => println!("[{}]", status.label()),
            SessionUpdate::Transcript(entry) => {
                println!("{}: {}", entry.speaker.label(), entry.text);
            }
            SessionUpdate::Toast(text) => println!("* {text}"),
        }
    }
}
