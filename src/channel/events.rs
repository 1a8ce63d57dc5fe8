//! Tagged event types crossing the remote channel.
//!
//! Inbound traffic is demultiplexed into exactly one [`InboundEvent`]
//! variant per logical event, so the session can match exhaustively and each
//! sub-handler can be tested on its own.

use crate::audio::WireAudio;
use crate::session::Speaker;

/// A capability invocation requested by the remote model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The correlated answer to a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub result: String,
}

/// Everything the remote party can tell us.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A chunk of synthesized speech.
    Audio(WireAudio),
    /// An incremental transcription delta.
    Transcript { speaker: Speaker, delta: String },
    /// A request to run a local capability.
    ToolCall(ToolCall),
    /// The current conversational turn is over.
    TurnComplete,
    /// The user barged in; pending model audio must stop now.
    Interrupted,
    /// The transport failed or the remote end hung up.
    Closed { reason: String },
}

/// Everything we send to the remote party.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Audio(WireAudio),
    ToolResult(ToolResult),
}
