//! Real-time voice co-pilot session core.
//!
//! Streams microphone audio to a remote conversational model over a
//! bidirectional channel, plays back its synthesized speech gap-free,
//! assembles a turn-based transcript and runs the local capabilities the
//! model asks for.
//!
//! | Module    | Role                                                   |
//! |-----------|--------------------------------------------------------|
//! | `audio`   | codec, capture pipeline, playback scheduler, devices   |
//! | `channel` | event types, drop-oldest send queue, WebSocket adapter |
//! | `session` | state machine, transcript, `Copilot` controller        |
//! | `tools`   | capability table, dispatcher, workspace collaborator   |
//! | `config`  | TOML settings and paths                                |

pub mod audio;
pub mod channel;
pub mod config;
pub mod session;
pub mod tools;
