//! Session status, update stream, and shared snapshot.
//!
//! [`SessionStatus`] is the state machine's current node.  Every transition,
//! finalized transcript entry and toast is pushed to observers as a
//! [`SessionUpdate`]; polling UIs can instead read a [`SharedSnapshot`].

use std::sync::{Arc, Mutex};

use crate::session::transcript::TranscriptEntry;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// States of a voice session.
///
/// ```text
/// Idle ──start()──▶ Listening ⇄ Speaking        (remote audio / text, turn complete)
///      any active ──tool call──▶ Thinking ──all results sent──▶ Listening
///      any active ──interrupted──▶ Listening    (playback flushed first)
///      any active ──channel error──▶ Error      (terminal)
///      any active ──stop()──▶ Idle              (terminal for this session)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Listening,
    Speaking,
    Thinking,
    Error,
}

impl SessionStatus {
    /// `true` while the session holds the microphone and the channel.
    ///
    /// ```
    /// use voice_copilot::session::SessionStatus;
    ///
    /// assert!(!SessionStatus::Idle.is_active());
    /// assert!(SessionStatus::Listening.is_active());
    /// assert!(SessionStatus::Speaking.is_active());
    /// assert!(SessionStatus::Thinking.is_active());
    /// assert!(!SessionStatus::Error.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Listening | SessionStatus::Speaking | SessionStatus::Thinking
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Listening => "Listening",
            SessionStatus::Speaking => "Speaking",
            SessionStatus::Thinking => "Thinking",
            SessionStatus::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionUpdate
// ---------------------------------------------------------------------------

/// Notifications for the presentation layer, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A status transition. `message` is set for `Error`.
    Status {
        status: SessionStatus,
        message: Option<String>,
    },
    /// A finalized utterance, appended to the transcript.
    Transcript(TranscriptEntry),
    /// A transient user-facing notice.
    Toast(String),
}

// ---------------------------------------------------------------------------
// SessionSnapshot / SharedSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Set when `status == Error`.
    pub error_message: Option<String>,
    /// Append-only for the lifetime of one session.
    pub transcript: Vec<TranscriptEntry>,
    /// Outbound audio frames discarded under backpressure.
    pub dropped_frames: u64,
}

/// Lock for short critical sections only; never across an `.await`.
pub type SharedSnapshot = Arc<Mutex<SessionSnapshot>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(Mutex::new(SessionSnapshot::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_idle() {
        assert_eq!(SessionStatus::default(), SessionStatus::Idle);
    }

    #[test]
    fn only_live_states_are_active() {
        let active: Vec<_> = [
            SessionStatus::Idle,
            SessionStatus::Listening,
            SessionStatus::Speaking,
            SessionStatus::Thinking,
            SessionStatus::Error,
        ]
        .into_iter()
        .filter(SessionStatus::is_active)
        .collect();
        assert_eq!(
            active,
            vec![
                SessionStatus::Listening,
                SessionStatus::Speaking,
                SessionStatus::Thinking
            ]
        );
    }

    #[test]
    fn labels() {
        assert_eq!(SessionStatus::Listening.label(), "Listening");
        assert_eq!(SessionStatus::Error.label(), "Error");
    }

    #[test]
    fn shared_snapshot_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedSnapshot>();
    }

    #[test]
    fn snapshot_starts_empty() {
        let snap = new_shared_snapshot();
        let snap = snap.lock().unwrap();
        assert_eq!(snap.status, SessionStatus::Idle);
        assert!(snap.transcript.is_empty());
        assert!(snap.error_message.is_none());
        assert_eq!(snap.dropped_frames, 0);
    }
}
