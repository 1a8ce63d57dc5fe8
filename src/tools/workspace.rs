//! The content workspace the co-pilot acts on.
//!
//! The session never talks to the CRUD backend directly; capabilities go
//! through the [`Workspace`] trait.  [`HttpWorkspace`] is the production
//! implementation: drafts are `POST`ed to `{base_url}/api/posts`, navigation
//! requests are validated against the configured screen list and recorded
//! for the UI to pick up.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::WorkspaceConfig;

// ---------------------------------------------------------------------------
// WorkspaceError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("unknown screen '{0}'")]
    UnknownScreen(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("workspace request timed out")]
    Timeout,

    #[error("workspace returned HTTP {0}")]
    Status(u16),

    #[error("failed to parse workspace response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for WorkspaceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WorkspaceError::Timeout
        } else {
            WorkspaceError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace trait
// ---------------------------------------------------------------------------

/// Side-effecting actions exposed to capabilities.
///
/// Both operations may be invoked more than once for the same request; a
/// repeated `create_draft` creates a second record.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn navigate(&self, screen: &str) -> Result<(), WorkspaceError>;

    /// Create a draft item and return its record id.
    async fn create_draft(&self, content: &str) -> Result<String, WorkspaceError>;
}

// ---------------------------------------------------------------------------
// HttpWorkspace
// ---------------------------------------------------------------------------

pub struct HttpWorkspace {
    client: reqwest::Client,
    config: WorkspaceConfig,
    last_screen: Mutex<Option<String>>,
}

impl HttpWorkspace {
    pub fn from_config(config: &WorkspaceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
            last_screen: Mutex::new(None),
        }
    }

    /// The most recent screen a `navigate` call asked for.
    pub fn last_screen(&self) -> Option<String> {
        self.last_screen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Workspace for HttpWorkspace {
    async fn navigate(&self, screen: &str) -> Result<(), WorkspaceError> {
        if !self.config.screens.iter().any(|s| s == screen) {
            return Err(WorkspaceError::UnknownScreen(screen.to_string()));
        }
        log::info!("workspace: navigate → {screen}");
        *self.last_screen.lock().unwrap_or_else(|e| e.into_inner()) = Some(screen.to_string());
        Ok(())
    }

    async fn create_draft(&self, content: &str) -> Result<String, WorkspaceError> {
        let url = format!("{}/api/posts", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "content": content,
            "status":  "draft"
        });

        let mut req = self.client.post(&url).json(&body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkspaceError::Status(status.as_u16()));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkspaceError::Parse(e.to_string()))?;

        let id = record_id(&json)
            .ok_or_else(|| WorkspaceError::Parse("response has no 'id' field".into()))?;
        log::info!("workspace: draft {id} created");
        Ok(id)
    }
}

/// Accepts `{"id": "…"}`, `{"id": 42}` or the same nested under `"data"`.
fn record_id(json: &serde_json::Value) -> Option<String> {
    let id = json.get("id").or_else(|| json.pointer("/data/id"))?;
    match id {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
