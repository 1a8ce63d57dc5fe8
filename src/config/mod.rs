//! Configuration for the voice co-pilot.
//!
//! `AppConfig` groups the live channel, audio and workspace settings and is
//! persisted as TOML; `AppPaths` resolves where it lives.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, LiveConfig, WorkspaceConfig, API_KEY_ENV};
