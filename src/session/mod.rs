//! Voice session: state machine, transcript assembly and observer surface.
//!
//! [`Copilot`] is the only entry point the presentation layer needs: it
//! starts and stops [`Session`]s and forwards their [`SessionUpdate`]s.

pub mod runner;
pub mod state;
pub mod transcript;

pub use runner::{Copilot, Session, SessionDeps, SessionError, SessionIo, SessionOptions};
pub use state::{new_shared_snapshot, SessionSnapshot, SessionStatus, SessionUpdate, SharedSnapshot};
pub use transcript::{Speaker, TranscriptAggregator, TranscriptEntry};
