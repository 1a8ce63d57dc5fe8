//! Turn-based transcript assembly.
//!
//! The remote model streams transcription as small text deltas for both the
//! user's speech and its own reply.  [`TranscriptAggregator`] buffers those
//! deltas per speaker and, on each turn boundary, turns every non-blank
//! buffer into one immutable [`TranscriptEntry`].

use uuid::Uuid;

/// Who produced a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Model => "Co-pilot",
        }
    }
}

/// One finalized utterance. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
}

/// Per-speaker accumulation buffers between turn boundaries.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user: String,
    model: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to `speaker`'s buffer. Nothing is emitted yet.
    pub fn append_partial(&mut self, speaker: Speaker, delta: &str) {
        self.buffer_mut(speaker).push_str(delta);
    }

    /// Finalize the current turn.
    ///
    /// Emits at most one entry per speaker, user first, skipping buffers that
    /// are empty after trimming. Both buffers are cleared.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        [Speaker::User, Speaker::Model]
            .into_iter()
            .filter_map(|speaker| {
                let raw = std::mem::take(self.buffer_mut(speaker));
                let text = raw.trim();
                (!text.is_empty()).then(|| TranscriptEntry {
                    id: Uuid::new_v4().to_string(),
                    speaker,
                    text: text.to_string(),
                })
            })
            .collect()
    }

    /// Text accumulated so far for `speaker` in the current turn.
    pub fn partial(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.user,
            Speaker::Model => &self.model,
        }
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }

    fn buffer_mut(&mut self, speaker: Speaker) -> &mut String {
        match speaker {
            Speaker::User => &mut self.user,
            Speaker::Model => &mut self.model,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partials_are_not_emitted_before_turn_complete() {
        let mut agg = TranscriptAggregator::new();
        agg.append_partial(Speaker::User, "hel");
        agg.append_partial(Speaker::User, "lo");
        assert_eq!(agg.partial(Speaker::User), "hello");
        assert_eq!(agg.partial(Speaker::Model), "");
    }

    #[test]
    fn complete_turn_emits_user_before_model() {
        let mut agg = TranscriptAggregator::new();
        agg.append_partial(Speaker::Model, "Sure, ");
        agg.append_partial(Speaker::User, "Draft a post");
        agg.append_partial(Speaker::Model, "drafting now.");

        let entries = agg.complete_turn();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[0].text, "Draft a post");
        assert_eq!(entries[1].speaker, Speaker::Model);
        assert_eq!(entries[1].text, "Sure, drafting now.");
    }

    #[test]
    fn whitespace_only_buffers_emit_nothing() {
        let mut agg = TranscriptAggregator::new();
        agg.append_partial(Speaker::User, "   \n\t");
        agg.append_partial(Speaker::Model, "ok");

        let entries = agg.complete_turn();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].speaker, Speaker::Model);
    }

    #[test]
    fn empty_turn_emits_nothing() {
        let mut agg = TranscriptAggregator::new();
        assert!(agg.complete_turn().is_empty());
    }

    #[test]
    fn buffers_are_cleared_after_turn() {
        let mut agg = TranscriptAggregator::new();
        agg.append_partial(Speaker::User, "first");
        agg.complete_turn();
        agg.append_partial(Speaker::User, "second");

        let entries = agg.complete_turn();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "second");
    }

    #[test]
    fn entries_get_distinct_ids() {
        let mut agg = TranscriptAggregator::new();
        agg.append_partial(Speaker::User, "a");
        agg.append_partial(Speaker::Model, "b");
        let entries = agg.complete_turn();
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[test]
    fn text_is_trimmed() {
        let mut agg = TranscriptAggregator::new();
        agg.append_partial(Speaker::Model, "  hi there  ");
        assert_eq!(agg.complete_turn()[0].text, "hi there");
    }
}
