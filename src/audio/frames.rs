//! Fixed-size frame assembly for the capture path.
//!
//! cpal delivers callbacks of whatever size the host prefers; the wire wants
//! frames of exactly `frame_samples` samples so that the send cadence is
//! `frame_samples / capture_rate` seconds.  [`FrameAssembler`] bridges the
//! two without reallocating: it owns one frame-sized buffer and hands out a
//! slice each time that buffer fills.
//!
//! ```rust
//! use voice_copilot::audio::FrameAssembler;
//!
//! let mut asm = FrameAssembler::new(4);
//! let mut frames = Vec::new();
//! asm.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], |f| frames.push(f.to_vec()));
//! assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
//! assert_eq!(asm.len(), 2);
//! ```

pub struct FrameAssembler {
    buf: Vec<f32>,
    frame_samples: usize,
}

impl FrameAssembler {
    /// # Panics
    ///
    /// Panics if `frame_samples == 0`.
    pub fn new(frame_samples: usize) -> Self {
        assert!(frame_samples > 0, "frame size must be > 0");
        Self {
            buf: Vec::with_capacity(frame_samples),
            frame_samples,
        }
    }

    /// Append `samples`, calling `emit` once for every completed frame.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let room = self.frame_samples - self.buf.len();
            let take = room.min(samples.len());
            self.buf.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.buf.len() == self.frame_samples {
                emit(&self.buf);
                self.buf.clear();
            }
        }
    }

    /// Samples waiting for the current frame to fill.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop a partially filled frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(asm: &mut FrameAssembler, input: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        asm.push(input, |f| frames.push(f.to_vec()));
        frames
    }

    #[test]
    fn short_push_emits_nothing() {
        let mut asm = FrameAssembler::new(8);
        assert!(collect(&mut asm, &[0.1; 5]).is_empty());
        assert_eq!(asm.len(), 5);
    }

    #[test]
    fn frames_span_multiple_pushes() {
        let mut asm = FrameAssembler::new(4);
        assert!(collect(&mut asm, &[1.0, 2.0, 3.0]).is_empty());
        let frames = collect(&mut asm, &[4.0, 5.0]);
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(asm.len(), 1);
    }

    #[test]
    fn large_push_emits_several_frames_in_order() {
        let mut asm = FrameAssembler::new(2);
        let frames = collect(&mut asm, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frames, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(asm.len(), 1);
    }

    #[test]
    fn every_frame_has_exact_size() {
        let mut asm = FrameAssembler::new(4096);
        let frames = collect(&mut asm, &vec![0.0; 4096 * 3 + 17]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4096));
    }

    #[test]
    fn clear_drops_partial_frame() {
        let mut asm = FrameAssembler::new(4);
        collect(&mut asm, &[1.0, 2.0]);
        asm.clear();
        assert!(asm.is_empty());
        assert!(collect(&mut asm, &[3.0, 4.0]).is_empty());
    }

    #[test]
    #[should_panic(expected = "frame size must be > 0")]
    fn zero_frame_size_panics() {
        let _ = FrameAssembler::new(0);
    }
}
