//! Output playback scheduler: gap-free back-to-back playback with flush.
//!
//! [`PlaybackScheduler`] owns a monotonically advancing start-time cursor and
//! the set of buffers currently handed to the output device.  Every decoded
//! buffer is placed at `max(cursor, now)` and the cursor moves to the end of
//! that buffer, so consecutive buffers abut exactly: no gap, no overlap.
//!
//! ```text
//! enqueue(b1)  start = max(0, now)      cursor = start + d1
//! enqueue(b2)  start = cursor           cursor = start + d2
//! flush()      stop every active voice  cursor = 0
//! enqueue(b3)  start = now
//! ```
//!
//! The scheduler is owned by the session task and mutated through `&mut
//! self`, so `enqueue` and `flush` cannot interleave.  Natural end-of-playback
//! notifications arrive asynchronously from the device as [`VoiceId`]s and are
//! fed back through [`PlaybackScheduler::on_ended`]; a voice leaves the
//! active set exactly once, by whichever of `on_ended` / `flush` gets to it
//! first.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::codec::PlayableBuffer;

// ---------------------------------------------------------------------------
// Device abstraction
// ---------------------------------------------------------------------------

/// Identifier for one scheduled buffer on the output device.
pub type VoiceId = u64;

/// Errors from the output device. Always non-fatal to the session.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    #[error("playback device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("playback device rejected buffer: {0}")]
    Rejected(String),
}

/// An output device able to start a buffer at an absolute time on its own
/// clock and to stop it early.
///
/// Implementations report natural completion by sending the voice id on the
/// `ended` channel handed to [`PlaybackOutput::open`]. A stopped voice must
/// not be reported as ended.
pub trait PlaybackDevice: Send {
    /// Current device time in seconds.
    fn now(&self) -> f64;

    /// Schedule `buffer` to begin at `start_at` seconds.
    fn start(
        &mut self,
        id: VoiceId,
        buffer: &PlayableBuffer,
        start_at: f64,
    ) -> Result<(), PlaybackError>;

    /// Stop a voice immediately. Unknown ids are ignored.
    fn stop(&mut self, id: VoiceId);
}

/// Factory for a [`PlaybackDevice`], opened once per session.
#[async_trait]
pub trait PlaybackOutput: Send + Sync {
    async fn open(
        &self,
        ended: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Box<dyn PlaybackDevice>, PlaybackError>;
}

/// Stand-in used when the real output device could not be opened: every
/// `start` fails, so each buffer is dropped independently and the session
/// carries on with text only.
pub struct UnavailableDevice {
    reason: String,
}

impl UnavailableDevice {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PlaybackDevice for UnavailableDevice {
    fn now(&self) -> f64 {
        0.0
    }

    fn start(&mut self, _: VoiceId, _: &PlayableBuffer, _: f64) -> Result<(), PlaybackError> {
        Err(PlaybackError::DeviceUnavailable(self.reason.clone()))
    }

    fn stop(&mut self, _: VoiceId) {}
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Where and when a buffer was placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledAudio {
    pub id: VoiceId,
    /// Absolute device time in seconds.
    pub start: f64,
    pub duration: f64,
}

impl ScheduledAudio {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    device: Box<dyn PlaybackDevice>,
    cursor: f64,
    active: BTreeMap<VoiceId, ScheduledAudio>,
    next_id: VoiceId,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        Self {
            device,
            cursor: 0.0,
            active: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Schedule `buffer` right after everything already scheduled.
    ///
    /// Returns `Ok(None)` for an empty buffer. On device failure the cursor
    /// is left untouched and the buffer is dropped.
    pub fn enqueue(
        &mut self,
        buffer: &PlayableBuffer,
    ) -> Result<Option<ScheduledAudio>, PlaybackError> {
        let duration = buffer.duration_secs();
        if duration <= 0.0 {
            return Ok(None);
        }

        let start = self.cursor.max(self.device.now());
        let id = self.next_id;
        self.next_id += 1;

        self.device.start(id, buffer, start)?;

        let scheduled = ScheduledAudio {
            id,
            start,
            duration,
        };
        self.cursor = scheduled.end();
        self.active.insert(id, scheduled);
        Ok(Some(scheduled))
    }

    /// Stop every active voice, forget them, and reset the cursor to zero.
    ///
    /// Returns how many voices were stopped.
    pub fn flush(&mut self) -> usize {
        let active = std::mem::take(&mut self.active);
        for id in active.keys() {
            self.device.stop(*id);
        }
        self.cursor = 0.0;
        if !active.is_empty() {
            log::debug!("playback: flushed {} voice(s)", active.len());
        }
        active.len()
    }

    /// Natural completion reported by the device. Returns `false` when the
    /// voice was already flushed.
    pub fn on_ended(&mut self, id: VoiceId) -> bool {
        self.active.remove(&id).is_some()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

// ---------------------------------------------------------------------------
// MockPlaybackDevice  (test-only)
// ---------------------------------------------------------------------------

/// Records every start/stop and exposes a settable clock.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockPlaybackDevice {
    pub clock: std::sync::Arc<std::sync::Mutex<f64>>,
    pub started: std::sync::Arc<std::sync::Mutex<Vec<(VoiceId, f64, f64)>>>,
    pub stopped: std::sync::Arc<std::sync::Mutex<Vec<VoiceId>>>,
    pub fail: bool,
}

#[cfg(test)]
impl MockPlaybackDevice {
    pub fn set_now(&self, t: f64) {
        *self.clock.lock().unwrap() = t;
    }
}

#[cfg(test)]
impl PlaybackDevice for MockPlaybackDevice {
    fn now(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn start(
        &mut self,
        id: VoiceId,
        buffer: &PlayableBuffer,
        start_at: f64,
    ) -> Result<(), PlaybackError> {
        if self.fail {
            return Err(PlaybackError::DeviceUnavailable("mock".into()));
        }
        self.started
            .lock()
            .unwrap()
            .push((id, start_at, buffer.duration_secs()));
        Ok(())
    }

    fn stop(&mut self, id: VoiceId) {
        self.stopped.lock().unwrap().push(id);
    }
}

#[cfg(test)]
#[async_trait]
impl PlaybackOutput for MockPlaybackDevice {
    async fn open(
        &self,
        _ended: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Box<dyn PlaybackDevice>, PlaybackError> {
        Ok(Box::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
