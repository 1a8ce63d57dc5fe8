//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Missing keys fall back to their defaults, so an old `settings.toml` keeps
//! loading after new fields are added.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable that overrides [`LiveConfig::api_key`].
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Connection to the remote conversational model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint of the bidirectional streaming API.
    pub endpoint: String,
    /// API key appended as `?key=`. `None` for endpoints without auth.
    pub api_key: Option<String>,
    /// Model identifier sent in the setup message.
    pub model: String,
    /// Prebuilt voice name for synthesized speech.
    pub voice: String,
    /// System instruction sent at session start. Empty to omit.
    pub system_instruction: String,
    /// Maximum seconds for connect + setup handshake.
    pub connect_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/\
                       google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
                .into(),
            api_key: None,
            model: "models/gemini-2.0-flash-live-001".into(),
            voice: "Puck".into(),
            system_instruction: "You are a concise voice co-pilot for a social content \
                                 workspace. Help the user draft posts and move around the app. \
                                 Use the available tools instead of describing actions."
                .into(),
            connect_timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Wire sample rate of outbound microphone audio, in Hz.
    pub capture_rate: u32,
    /// Samples per outbound frame (cadence = frame_samples / capture_rate).
    pub frame_samples: usize,
    /// Sample rate assumed for inbound audio without a `rate=` parameter.
    pub playback_rate: u32,
    /// Outbound frames buffered before the oldest is dropped.
    pub send_queue_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_rate: 16_000,
            frame_samples: 4_096,
            playback_rate: 24_000,
            send_queue_frames: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkspaceConfig
// ---------------------------------------------------------------------------

/// The content backend that capabilities act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Base URL of the backend, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Bearer token. `None` for an unauthenticated local backend.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Screen identifiers `navigate` accepts.
    pub screens: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            api_key: None,
            timeout_secs: 10,
            screens: ["dashboard", "calendar", "posts", "analytics", "settings"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_copilot::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub workspace: WorkspaceConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Replace the live API key with `key` when it is set and non-empty.
    ///
    /// `main` feeds this from [`API_KEY_ENV`].
    pub fn override_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.live.api_key = Some(key.trim().to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
