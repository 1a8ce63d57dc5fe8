//! Bounded outbound audio queue with drop-oldest overflow.
//!
//! The capture worker must never block on the network, so frames are pushed
//! into a [`SendQueue`] and drained by the session's uplink task.  When the
//! channel stalls and the queue reaches capacity, the **oldest** frame is
//! discarded: the remote party cares about what the user is saying now, not
//! what they said several seconds ago.
//!
//! Tool results never go through this queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::audio::WireAudio;

/// Single-consumer, multi-producer frame queue.
///
/// `push` is synchronous and never waits; `pop` is async and resolves once a
/// frame is available or the queue has been closed and drained.
pub struct SendQueue {
    frames: Mutex<VecDeque<WireAudio>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SendQueue {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SendQueue capacity must be > 0");
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame. Returns `false` if the queue is closed.
    ///
    /// At capacity the oldest queued frame is discarded first.
    pub fn push(&self, frame: WireAudio) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        {
            let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
            if frames.len() == self.capacity {
                frames.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    log::warn!("uplink: send queue full, {dropped} frame(s) dropped so far");
                }
            }
            frames.push_back(frame);
        }

        self.notify.notify_one();
        true
    }

    /// Wait for the next frame. `None` once closed and empty.
    pub async fn pop(&self) -> Option<WireAudio> {
        loop {
            {
                let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Reject further pushes and discard anything still queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.notify.notify_one();
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(tag: &str) -> WireAudio {
        WireAudio {
            mime_type: "audio/pcm;rate=16000".into(),
            data: tag.into(),
        }
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let q = SendQueue::new(4);
        q.push(frame("a"));
        q.push(frame("b"));
        assert_eq!(q.pop().await.unwrap().data, "a");
        assert_eq!(q.pop().await.unwrap().data, "b");
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let q = SendQueue::new(2);
        q.push(frame("a"));
        q.push(frame("b"));
        q.push(frame("c"));

        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop().await.unwrap().data, "b");
        assert_eq!(q.pop().await.unwrap().data, "c");
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = Arc::new(SendQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(frame("late"));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should wake")
            .unwrap();
        assert_eq!(got.unwrap().data, "late");
    }

    #[tokio::test]
    async fn close_wakes_waiter_with_none() {
        let q = Arc::new(SendQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.close();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("close should wake")
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn push_after_close_is_rejected() {
        let q = SendQueue::new(4);
        q.close();
        assert!(!q.push(frame("x")));
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic(expected = "SendQueue capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = SendQueue::new(0);
    }
}
