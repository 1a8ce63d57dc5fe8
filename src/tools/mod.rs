//! Local capabilities invoked by the remote model.
//!
//! ```text
//! InboundEvent::ToolCall → ToolDispatcher → CapabilityTable[name]
//!                                               └─► Workspace (navigate / create_draft)
//!                        ← ToolReply{call_id, result, toast, ends_session}
//! ```

pub mod capabilities;
pub mod dispatcher;
pub mod workspace;

pub use capabilities::{
    Capability, CapabilityError, CapabilityOutput, CapabilityTable, CreateDraftCapability,
    NavigateCapability, ToolDeclaration,
};
pub use dispatcher::{PendingToolCall, ToolDispatcher, ToolReply};
pub use workspace::{HttpWorkspace, Workspace, WorkspaceError};
