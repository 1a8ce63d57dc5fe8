//! Session state machine and the `Copilot` start/stop controller.
//!
//! A [`Session`] owns every live resource of one voice conversation: the
//! capture handle, the channel handle, the playback scheduler and the tool
//! dispatcher.  It runs as a single tokio task that multiplexes four inputs:
//!
//! ```text
//!            ┌────────── inbound (channel) ──► handle_inbound
//!            │             Audio ─► decode ─► PlaybackScheduler::enqueue
//!            │             Transcript ─► TranscriptAggregator
//! select! ───┤             ToolCall ─► ToolDispatcher::dispatch
//!            │             TurnComplete / Interrupted / Closed
//!            ├────────── tool replies ──► handle_reply ─► channel result
//!            ├────────── playback ended ──► PlaybackScheduler::on_ended
//!            └────────── stop signal ──► stop()
//!
//! mic (capture thread) ─► SendQueue ─► uplink task ─► channel audio
//! ```
//!
//! Teardown is a single idempotent routine shared by `stop()` and `fail()`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::{
    AudioCodec, CaptureError, CaptureHandle, MicrophoneSource, PlaybackDevice, PlaybackOutput,
    PlaybackScheduler, UnavailableDevice, VoiceId, WireAudio,
};
use crate::channel::{
    ChannelConnector, ChannelError, ChannelHandle, InboundEvent, SendQueue, SessionSetup,
    ToolResult,
};
use crate::config::AppConfig;
use crate::session::state::{SessionSnapshot, SessionStatus, SessionUpdate, SharedSnapshot};
use crate::session::transcript::{Speaker, TranscriptAggregator};
use crate::tools::{CapabilityTable, ToolDispatcher, ToolReply};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a voice session is already active")]
    AlreadyActive,

    #[error("no voice session is active")]
    NotActive,

    #[error("microphone unavailable: {0}")]
    Capture(#[from] CaptureError),

    #[error("could not reach the assistant: {0}")]
    Channel(#[from] ChannelError),
}

// ---------------------------------------------------------------------------
// Dependencies and options
// ---------------------------------------------------------------------------

/// External collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn ChannelConnector>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub speaker: Arc<dyn PlaybackOutput>,
    pub capabilities: CapabilityTable,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub capture_rate: u32,
    pub playback_rate: u32,
    pub send_queue_frames: usize,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.live.model.clone(),
            voice: config.live.voice.clone(),
            system_instruction: config.live.system_instruction.clone(),
            capture_rate: config.audio.capture_rate,
            playback_rate: config.audio.playback_rate,
            send_queue_frames: config.audio.send_queue_frames.max(1),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Receivers the run loop selects over, kept apart from [`Session`] so the
/// handlers can borrow it mutably.
pub struct SessionIo {
    inbound: mpsc::Receiver<InboundEvent>,
    replies: mpsc::UnboundedReceiver<ToolReply>,
    ended: mpsc::UnboundedReceiver<VoiceId>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    status: SessionStatus,
    channel: Option<ChannelHandle>,
    capture: Option<CaptureHandle>,
    uplink: Option<JoinHandle<()>>,
    frames: Arc<SendQueue>,
    scheduler: PlaybackScheduler,
    codec: AudioCodec,
    transcript: TranscriptAggregator,
    dispatcher: ToolDispatcher,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    snapshot: SharedSnapshot,
    torn_down: bool,
}

impl Session {
    /// Acquire the microphone, then the channel, then the speaker.
    ///
    /// On microphone or channel failure the session reports `Error` and
    /// nothing acquired so far is retained.  A missing speaker only costs
    /// audio output.
    pub async fn start(
        deps: &SessionDeps,
        options: &SessionOptions,
        updates: mpsc::UnboundedSender<SessionUpdate>,
        snapshot: SharedSnapshot,
    ) -> Result<(Session, SessionIo), SessionError> {
        let frames = Arc::new(SendQueue::new(options.send_queue_frames));

        let capture = match deps.microphone.open(Arc::clone(&frames)).await {
            Ok(capture) => capture,
            Err(e) => {
                frames.close();
                let err = SessionError::from(e);
                report_start_failure(&updates, &snapshot, &err);
                return Err(err);
            }
        };

        let setup = SessionSetup {
            model: options.model.clone(),
            voice: options.voice.clone(),
            system_instruction: options.system_instruction.clone(),
            tools: deps.capabilities.declarations(),
        };

        let mut channel = match deps.connector.connect(&setup).await {
            Ok(channel) => channel,
            Err(e) => {
                capture.release();
                frames.close();
                let err = SessionError::from(e);
                report_start_failure(&updates, &snapshot, &err);
                return Err(err);
            }
        };

        let Some(inbound) = channel.take_inbound() else {
            capture.release();
            frames.close();
            channel.close();
            let err = SessionError::Channel(ChannelError::Closed);
            report_start_failure(&updates, &snapshot, &err);
            return Err(err);
        };

        let (ended_tx, ended) = mpsc::unbounded_channel();
        let device: Box<dyn PlaybackDevice> = match deps.speaker.open(ended_tx).await {
            Ok(device) => device,
            Err(e) => {
                log::warn!("session: playback unavailable, continuing without audio: {e}");
                let _ = updates.send(SessionUpdate::Toast(
                    "Audio output unavailable; transcript only".into(),
                ));
                Box::new(UnavailableDevice::new(e.to_string()))
            }
        };

        let uplink = tokio::spawn(run_uplink(Arc::clone(&frames), channel.audio_sender()));
        let (dispatcher, replies) = ToolDispatcher::new(deps.capabilities.clone());

        let mut session = Session {
            status: SessionStatus::Idle,
            channel: Some(channel),
            capture: Some(capture),
            uplink: Some(uplink),
            frames,
            scheduler: PlaybackScheduler::new(device),
            codec: AudioCodec::new(options.capture_rate, options.playback_rate),
            transcript: TranscriptAggregator::new(),
            dispatcher,
            updates,
            snapshot,
            torn_down: false,
        };
        session.set_status(SessionStatus::Listening, None);
        log::info!("session: started");

        Ok((
            session,
            SessionIo {
                inbound,
                replies,
                ended,
            },
        ))
    }

    /// Drive the session until it stops or fails. Returns the final status.
    ///
    /// Firing (or dropping the sender of) `stop` ends the session normally.
    pub async fn run(mut self, mut io: SessionIo, mut stop: oneshot::Receiver<()>) -> SessionStatus {
        while !self.torn_down {
            tokio::select! {
                _ = &mut stop => self.stop(),
                event = io.inbound.recv() => match event {
                    Some(event) => self.handle_inbound(event),
                    None => self.fail("Connection to the assistant closed".into()),
                },
                Some(reply) = io.replies.recv() => self.handle_reply(reply),
                Some(id) = io.ended.recv() => {
                    self.scheduler.on_ended(id);
                }
            }
        }
        self.status
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    fn handle_inbound(&mut self, event: InboundEvent) {
        if self.torn_down {
            return;
        }
        match event {
            InboundEvent::Audio(chunk) => self.handle_audio(&chunk),
            InboundEvent::Transcript { speaker, delta } => {
                self.transcript.append_partial(speaker, &delta);
                if speaker == Speaker::Model {
                    self.on_remote_content();
                }
            }
            InboundEvent::ToolCall(call) => {
                if self.dispatcher.dispatch(call) {
                    self.set_status(SessionStatus::Thinking, None);
                }
            }
            InboundEvent::TurnComplete => self.handle_turn_complete(),
            InboundEvent::Interrupted => {
                let stopped = self.scheduler.flush();
                log::debug!("session: interrupted, {stopped} buffer(s) stopped");
                self.set_status(SessionStatus::Listening, None);
            }
            InboundEvent::Closed { reason } => {
                self.fail(format!("Connection to the assistant lost: {reason}"));
            }
        }
    }

    fn handle_audio(&mut self, chunk: &WireAudio) {
        let buffer = match self.codec.decode(chunk) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("session: dropping inbound audio: {e}");
                return;
            }
        };
        self.on_remote_content();
        if let Err(e) = self.scheduler.enqueue(&buffer) {
            log::warn!("session: playback failed, audio dropped: {e}");
        }
    }

    /// Remote content moves a listening/speaking session to `Speaking`.
    /// A session waiting on tools stays in `Thinking`.
    fn on_remote_content(&mut self) {
        if matches!(
            self.status,
            SessionStatus::Listening | SessionStatus::Speaking
        ) {
            self.set_status(SessionStatus::Speaking, None);
        }
    }

    fn handle_turn_complete(&mut self) {
        let entries = self.transcript.complete_turn();
        {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            snap.transcript.extend(entries.iter().cloned());
            snap.dropped_frames = self.frames.dropped();
        }
        for entry in entries {
            log::debug!("session: {}: {}", entry.speaker.label(), entry.text);
            let _ = self.updates.send(SessionUpdate::Transcript(entry));
        }
        if self.status == SessionStatus::Speaking {
            self.set_status(SessionStatus::Listening, None);
        }
    }

    // -----------------------------------------------------------------------
    // Tool replies
    // -----------------------------------------------------------------------

    fn handle_reply(&mut self, reply: ToolReply) {
        if self.torn_down {
            return;
        }
        if self.dispatcher.complete(&reply.call_id).is_none() {
            log::debug!("session: discarding stale reply for {}", reply.call_id);
            return;
        }

        let sent = match &self.channel {
            Some(channel) => channel.send_result(ToolResult {
                call_id: reply.call_id,
                name: reply.name,
                result: reply.result,
            }),
            None => Err(ChannelError::Closed),
        };
        if let Err(e) = sent {
            self.fail(format!("Could not deliver tool result: {e}"));
            return;
        }

        if let Some(toast) = reply.toast {
            let _ = self.updates.send(SessionUpdate::Toast(toast));
        }
        if reply.ends_session {
            log::info!("session: capability requested end of session");
            self.stop();
            return;
        }
        if self.dispatcher.outstanding() == 0 && self.status == SessionStatus::Thinking {
            self.set_status(SessionStatus::Listening, None);
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// User-initiated stop. No-op after teardown.
    pub fn stop(&mut self) {
        if self.torn_down {
            return;
        }
        self.teardown();
        self.set_status(SessionStatus::Idle, None);
        log::info!("session: stopped");
    }

    /// Unrecoverable error. No-op after teardown.
    fn fail(&mut self, message: String) {
        if self.torn_down {
            return;
        }
        log::error!("session: {message}");
        self.teardown();
        self.set_status(SessionStatus::Error, Some(message));
    }

    /// Release every owned resource. Runs its body at most once.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.frames.close();
        if let Some(capture) = self.capture.take() {
            capture.release();
        }
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        self.scheduler.flush();
        self.dispatcher.detach_all();
        self.transcript.clear();
        if let Some(channel) = self.channel.take() {
            channel.close();
        }

        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dropped_frames = self.frames.dropped();
    }

    fn set_status(&mut self, status: SessionStatus, message: Option<String>) {
        if self.status == status && message.is_none() {
            return;
        }
        log::debug!("session: {} → {}", self.status.label(), status.label());
        self.status = status;
        publish_status(&self.updates, &self.snapshot, status, message);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn publish_status(
    updates: &mpsc::UnboundedSender<SessionUpdate>,
    snapshot: &SharedSnapshot,
    status: SessionStatus,
    message: Option<String>,
) {
    {
        let mut snap = snapshot.lock().unwrap_or_else(|e| e.into_inner());
        snap.status = status;
        snap.error_message = message.clone();
    }
    let _ = updates.send(SessionUpdate::Status { status, message });
}

fn report_start_failure(
    updates: &mpsc::UnboundedSender<SessionUpdate>,
    snapshot: &SharedSnapshot,
    err: &SessionError,
) {
    log::error!("session: start failed: {err}");
    publish_status(updates, snapshot, SessionStatus::Error, Some(err.to_string()));
}

/// Forward captured frames to the channel. Awaiting the channel here is what
/// lets a stalled transport back up into the drop-oldest queue.
async fn run_uplink(frames: Arc<SendQueue>, audio: mpsc::Sender<WireAudio>) {
    while let Some(frame) = frames.pop().await {
        if audio.send(frame).await.is_err() {
            log::debug!("uplink: channel gone");
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Copilot controller
// ---------------------------------------------------------------------------

struct ActiveSession {
    stop: oneshot::Sender<()>,
    task: JoinHandle<SessionStatus>,
}

/// Start/stop surface for the presentation layer.
///
/// At most one session is active at a time.  Updates from every session
/// this controller starts arrive on the receiver returned by
/// [`Copilot::new`].
pub struct Copilot {
    deps: SessionDeps,
    options: SessionOptions,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    snapshot: SharedSnapshot,
    active: Option<ActiveSession>,
}

impl Copilot {
    pub fn new(
        deps: SessionDeps,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                deps,
                options,
                updates: tx,
                snapshot: crate::session::state::new_shared_snapshot(),
                active: None,
            },
            rx,
        )
    }

    /// Start a new session.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = SessionSnapshot::default();

        let (session, io) = Session::start(
            &self.deps,
            &self.options,
            self.updates.clone(),
            Arc::clone(&self.snapshot),
        )
        .await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(io, stop_rx));
        self.active = Some(ActiveSession {
            stop: stop_tx,
            task,
        });
        Ok(())
    }

    /// Stop the active session and wait for its teardown.
    pub async fn stop(&mut self) -> Result<SessionStatus, SessionError> {
        let active = self.active.take().ok_or(SessionError::NotActive)?;
        let _ = active.stop.send(());
        Ok(active.task.await.unwrap_or_else(|e| {
            log::error!("session: task failed: {e}");
            SessionStatus::Error
        }))
    }

    /// Wait until the active session ends on its own (error or a capability
    /// ending it). Returns `None` when no session was started.
    ///
    /// Cancel-safe: dropping the future leaves the session running.
    pub async fn wait(&mut self) -> Option<SessionStatus> {
        let active = self.active.as_mut()?;
        let status = (&mut active.task).await.unwrap_or(SessionStatus::Error);
        self.active = None;
        Some(status)
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
