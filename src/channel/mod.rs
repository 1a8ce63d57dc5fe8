//! Remote channel: the bidirectional link to the conversational model.
//!
//! ```text
//!            ┌──────────── ChannelHandle (owned by Session) ────────────┐
//!  uplink ──►│ audio:   mpsc::Sender<WireAudio>      (bounded)          │──► peer
//!  session ─►│ results: mpsc::UnboundedSender<ToolResult>               │──► peer
//!  session ◄─│ inbound: mpsc::Receiver<InboundEvent>                    │◄── peer
//!            └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`ChannelConnector`] performs the handshake and hands back a
//! [`ChannelHandle`]; the far side of the in-memory link is a
//! [`ChannelPeer`], driven either by a transport adapter ([`live`]) or by a
//! test.

pub mod events;
pub mod live;
pub mod queue;

pub use events::{InboundEvent, OutboundEvent, ToolCall, ToolResult};
pub use live::LiveConnector;
pub use queue::SendQueue;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::WireAudio;
use crate::tools::ToolDeclaration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel handshake failed: {0}")]
    Handshake(String),

    #[error("channel handshake timed out after {0} s")]
    Timeout(u64),

    #[error("channel transport error: {0}")]
    Transport(String),

    #[error("channel closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Everything the remote party needs to know before the first frame.
#[derive(Debug, Clone, Default)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub tools: Vec<ToolDeclaration>,
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens a channel. May suspend for the duration of the handshake.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, setup: &SessionSetup) -> Result<ChannelHandle, ChannelError>;
}

// ---------------------------------------------------------------------------
// ChannelHandle / ChannelPeer
// ---------------------------------------------------------------------------

/// Audio frames buffered between the uplink task and the transport writer.
/// Kept small so a stalled transport backs up into the drop-oldest
/// [`SendQueue`] instead of here.
pub const AUDIO_LINK_CAPACITY: usize = 4;

/// Inbound events buffered between the transport reader and the session.
pub const INBOUND_LINK_CAPACITY: usize = 256;

/// The session's end of an open channel.
///
/// The close hook runs exactly once, on [`ChannelHandle::close`] or on drop.
pub struct ChannelHandle {
    audio: mpsc::Sender<WireAudio>,
    results: mpsc::UnboundedSender<ToolResult>,
    inbound: Option<mpsc::Receiver<InboundEvent>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

/// The transport's end of an open channel.
pub struct ChannelPeer {
    /// Events to deliver to the session.
    pub inbound: mpsc::Sender<InboundEvent>,
    /// Audio frames produced by capture.
    pub audio: mpsc::Receiver<WireAudio>,
    /// Tool results produced by the dispatcher.
    pub results: mpsc::UnboundedReceiver<ToolResult>,
}

impl ChannelHandle {
    /// Create a connected handle/peer pair.
    pub fn pair(on_close: impl FnOnce() + Send + 'static) -> (ChannelHandle, ChannelPeer) {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_LINK_CAPACITY);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_LINK_CAPACITY);

        let handle = ChannelHandle {
            audio: audio_tx,
            results: results_tx,
            inbound: Some(inbound_rx),
            on_close: Some(Box::new(on_close)),
        };
        let peer = ChannelPeer {
            inbound: inbound_tx,
            audio: audio_rx,
            results: results_rx,
        };
        (handle, peer)
    }

    /// A sender for the uplink task. Awaiting it applies backpressure.
    pub fn audio_sender(&self) -> mpsc::Sender<WireAudio> {
        self.audio.clone()
    }

    /// Send a tool result. Never waits and never drops while the peer lives.
    pub fn send_result(&self, result: ToolResult) -> Result<(), ChannelError> {
        self.results.send(result).map_err(|_| ChannelError::Closed)
    }

    /// Take the inbound receiver. Returns `None` after the first call.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.inbound.take()
    }

    /// Close the channel now.
    pub fn close(mut self) {
        self.run_close();
    }

    fn run_close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            log::debug!("channel: closing");
            on_close();
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.run_close();
    }
}

// ---------------------------------------------------------------------------
// MockConnector  (test-only)
// ---------------------------------------------------------------------------

/// Hands the peer end of every connection to the test and counts closes.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockConnector {
    pub peers: std::sync::Arc<std::sync::Mutex<Vec<ChannelPeer>>>,
    pub setups: std::sync::Arc<std::sync::Mutex<Vec<SessionSetup>>>,
    pub closed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub refuse: bool,
}

#[cfg(test)]
impl MockConnector {
    pub fn take_peer(&self) -> ChannelPeer {
        self.peers.lock().unwrap().remove(0)
    }
}

#[cfg(test)]
#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<ChannelHandle, ChannelError> {
        if self.refuse {
            return Err(ChannelError::Handshake("refused by mock".into()));
        }
        self.setups.lock().unwrap().push(setup.clone());
        let closed = std::sync::Arc::clone(&self.closed);
        let (handle, peer) = ChannelHandle::pair(move || {
            closed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        self.peers.lock().unwrap().push(peer);
        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
