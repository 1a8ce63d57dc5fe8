//! Capabilities the remote model may invoke, and the table that names them.
//!
//! A [`Capability`] declares itself (name, description, JSON parameter
//! schema) so the declaration can be sent in the channel setup, and runs
//! asynchronously when called.  The [`CapabilityTable`] is fixed for the
//! lifetime of a session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::tools::workspace::Workspace;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Function declaration advertised to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// What a capability hands back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityOutput {
    /// Result string sent to the remote party.
    pub text: String,
    /// Optional transient message for the user.
    pub toast: Option<String>,
    /// Stop the session once the result has been sent.
    pub ends_session: bool,
}

impl CapabilityOutput {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            toast: None,
            ends_session: false,
        }
    }

    pub fn with_toast(mut self, toast: impl Into<String>) -> Self {
        self.toast = Some(toast.into());
        self
    }

    pub fn ending_session(mut self) -> Self {
        self.ends_session = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Capability: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn invoke(&self, arguments: Value) -> Result<CapabilityOutput, CapabilityError>;
}

// ---------------------------------------------------------------------------
// CapabilityTable
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CapabilityTable {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `navigate` and `createDraftItem` backed by `workspace`.
    pub fn builtin(workspace: Arc<dyn Workspace>) -> Self {
        let mut table = Self::new();
        table.register(Arc::new(NavigateCapability::new(Arc::clone(&workspace))));
        table.register(Arc::new(CreateDraftCapability::new(workspace)));
        table
    }

    /// Register under the capability's declared name, replacing any
    /// previous entry with that name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.declaration().name;
        if self.entries.insert(name.clone(), capability).is_some() {
            log::warn!("tools: capability '{name}' registered twice; keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).cloned()
    }

    /// Declarations sorted by name.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<_> = self.entries.values().map(|c| c.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, CapabilityError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CapabilityError::InvalidArguments(format!("'{key}' must be a non-empty string")))
}

// ---------------------------------------------------------------------------
// navigate
// ---------------------------------------------------------------------------

/// Switches the UI to another screen, then ends the voice session.
pub struct NavigateCapability {
    workspace: Arc<dyn Workspace>,
}

impl NavigateCapability {
    pub const NAME: &'static str = "navigate";

    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for NavigateCapability {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: Self::NAME.into(),
            description: "Open a screen of the application. Ends the voice session.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "screen": { "type": "string", "description": "Screen identifier" }
                },
                "required": ["screen"]
            }),
        }
    }

    async fn invoke(&self, arguments: Value) -> Result<CapabilityOutput, CapabilityError> {
        let screen = required_str(&arguments, "screen")?;
        self.workspace
            .navigate(screen)
            .await
            .map_err(|e| CapabilityError::Failed(e.to_string()))?;
        Ok(CapabilityOutput::reply(format!("Navigated to {screen}")).ending_session())
    }
}

// ---------------------------------------------------------------------------
// createDraftItem
// ---------------------------------------------------------------------------

/// Saves dictated content as a new draft record.
pub struct CreateDraftCapability {
    workspace: Arc<dyn Workspace>,
}

impl CreateDraftCapability {
    pub const NAME: &'static str = "createDraftItem";

    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for CreateDraftCapability {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: Self::NAME.into(),
            description: "Create a draft post with the given content.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "Body of the draft" }
                },
                "required": ["content"]
            }),
        }
    }

    async fn invoke(&self, arguments: Value) -> Result<CapabilityOutput, CapabilityError> {
        let content = required_str(&arguments, "content")?;
        let id = self
            .workspace
            .create_draft(content)
            .await
            .map_err(|e| CapabilityError::Failed(e.to_string()))?;
        Ok(CapabilityOutput::reply(format!("Draft created with id {id}")).with_toast("Draft created"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
