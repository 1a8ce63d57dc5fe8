//! Microphone capture pipeline via `cpal`.
//!
//! ```text
//! cpal callback ──AudioChunk (std mpsc, never blocks)──▶ capture worker
//!     downmix → StreamingResampler → FrameAssembler → AudioCodec::encode
//!     ──▶ SendQueue::push  (drop-oldest, never blocks)
//! ```
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! dedicated [`StreamThread`].  The [`CaptureHandle`] handed to the session is
//! a RAII guard: dropping it stops the stream thread and joins it, which
//! releases the device before `drop` returns.

use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::codec::{AudioCodec, WireAudio};
use crate::audio::frames::FrameAssembler;
use crate::audio::resample::{downmix_to_mono, StreamingResampler};
use crate::channel::SendQueue;
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Native device rate in Hz.
    pub sample_rate: u32,
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring the microphone.
///
/// Every variant is fatal to session start.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture thread failed: {0}")]
    Thread(String),
}

impl From<StreamThreadError<CaptureError>> for CaptureError {
    fn from(e: StreamThreadError<CaptureError>) -> Self {
        match e {
            StreamThreadError::Build(inner) => inner,
            other => CaptureError::Thread(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamThread
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StreamThreadError<E> {
    #[error("{0}")]
    Build(E),

    #[error("failed to spawn stream thread: {0}")]
    Spawn(std::io::Error),

    #[error("stream thread exited before reporting readiness")]
    Exited,
}

/// Keeps a `cpal::Stream` alive on its own OS thread.
///
/// Dropping the handle signals the thread, which drops the stream, and then
/// joins it.
pub struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and wait until it reports success or
    /// failure. This blocks; call it from `spawn_blocking`.
    pub fn spawn<E, F>(name: &str, build: F) -> Result<Self, StreamThreadError<E>>
    where
        E: Send + 'static,
        F: FnOnce() -> Result<cpal::Stream, E> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), E>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Returns on explicit stop or when the handle is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(StreamThreadError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                join: Some(join),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(StreamThreadError::Build(e))
            }
            Err(_) => {
                let _ = join.join();
                Err(StreamThreadError::Exited)
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("audio stream thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureHandle
// ---------------------------------------------------------------------------

/// Exclusive ownership of an open microphone.
///
/// The device is released exactly once: on [`CaptureHandle::release`] or on
/// drop, whichever happens first.
pub struct CaptureHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    fn from_thread(thread: StreamThread) -> Self {
        Self::new(move || drop(thread))
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Device-independent half of the capture path: native chunks in, encoded
/// wire frames out.
pub struct CapturePipeline {
    resampler: StreamingResampler,
    assembler: FrameAssembler,
    codec: AudioCodec,
}

impl CapturePipeline {
    pub fn new(device_rate: u32, settings: &CaptureSettings) -> Self {
        Self {
            resampler: StreamingResampler::new(device_rate, settings.capture_rate),
            assembler: FrameAssembler::new(settings.frame_samples.max(1)),
            codec: AudioCodec::new(settings.capture_rate, settings.capture_rate),
        }
    }

    /// Process one chunk, calling `emit` for each complete wire frame.
    pub fn process(&mut self, chunk: &AudioChunk, mut emit: impl FnMut(WireAudio)) {
        let mono = downmix_to_mono(&chunk.samples, chunk.channels);
        let resampled = self.resampler.process(&mono);
        let codec = self.codec;
        self.assembler
            .push(&resampled, |frame| emit(codec.encode(frame)));
    }
}

// ---------------------------------------------------------------------------
// MicrophoneSource
// ---------------------------------------------------------------------------

/// Wire-side capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Sample rate of outbound frames in Hz.
    pub capture_rate: u32,
    /// Samples per outbound frame.
    pub frame_samples: usize,
}

impl CaptureSettings {
    /// Settings from the `[audio]` table. A zero frame size becomes one
    /// sample per frame.
    pub fn from_config(cfg: &AudioConfig) -> Self {
        Self {
            capture_rate: cfg.capture_rate,
            frame_samples: cfg.frame_samples,
        }
        .normalized()
    }

    fn normalized(self) -> Self {
        Self {
            frame_samples: self.frame_samples.max(1),
            ..self
        }
    }
}

/// Opens the microphone and streams encoded frames into `frames`.
///
/// Acquisition may suspend while the platform asks the user for permission.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn open(&self, frames: Arc<SendQueue>) -> Result<CaptureHandle, CaptureError>;
}

/// Default-input-device microphone built on `cpal`.
pub struct CpalMicrophone {
    settings: CaptureSettings,
}

impl CpalMicrophone {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings: settings.normalized(),
        }
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn open(&self, frames: Arc<SendQueue>) -> Result<CaptureHandle, CaptureError> {
        let settings = self.settings;
        let thread = tokio::task::spawn_blocking(move || {
            StreamThread::spawn("mic-stream", move || open_input_stream(settings, frames))
        })
        .await
        .map_err(|e| CaptureError::Thread(e.to_string()))??;

        Ok(CaptureHandle::from_thread(thread))
    }
}

/// Build and start the cpal input stream plus its worker thread.
///
/// The worker exits on its own once the stream (and with it the callback's
/// sender) is dropped.
fn open_input_stream(
    settings: CaptureSettings,
    frames: Arc<SendQueue>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let supported = device.default_input_config()?;
    let channels = supported.channels();
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let (chunk_tx, chunk_rx) = std_mpsc::channel::<AudioChunk>();

    let mut pipeline = CapturePipeline::new(sample_rate, &settings);
    std::thread::Builder::new()
        .name("capture-worker".into())
        .spawn(move || {
            while let Ok(chunk) = chunk_rx.recv() {
                pipeline.process(&chunk, |frame| {
                    frames.push(frame);
                });
            }
            log::debug!("capture: worker exiting");
        })
        .map_err(|e| CaptureError::Thread(e.to_string()))?;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Ignore send errors; the worker may already be gone.
                let _ = chunk_tx.send(AudioChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                });
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::PermissionDenied("input device not available".into())
            }
            other => CaptureError::BuildStream(other),
        })?;

    stream.play()?;
    log::info!("capture: started ({sample_rate} Hz, {channels} ch)");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// MockMicrophone  (test-only)
// ---------------------------------------------------------------------------

/// Counts acquisitions and releases; can be told to deny access.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockMicrophone {
    pub opened: Arc<std::sync::atomic::AtomicUsize>,
    pub released: Arc<std::sync::atomic::AtomicUsize>,
    pub deny: bool,
}

#[cfg(test)]
#[async_trait]
impl MicrophoneSource for MockMicrophone {
    async fn open(&self, _frames: Arc<SendQueue>) -> Result<CaptureHandle, CaptureError> {
        use std::sync::atomic::Ordering;
        if self.deny {
            return Err(CaptureError::PermissionDenied("denied by user".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        Ok(CaptureHandle::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> CaptureSettings {
        CaptureSettings {
            capture_rate: 16_000,
            frame_samples: 160,
        }
    }

    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
        assert_send::<CaptureHandle>();
    }

    #[test]
    fn pipeline_emits_fixed_frames_at_capture_rate() {
        let mut pipeline = CapturePipeline::new(16_000, &settings());
        let chunk = AudioChunk {
            samples: vec![0.1; 400],
            sample_rate: 16_000,
            channels: 1,
        };
        let mut frames = Vec::new();
        pipeline.process(&chunk, |f| frames.push(f));

        assert_eq!(frames.len(), 2);
        let codec = AudioCodec::new(16_000, 16_000);
        for frame in &frames {
            assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
            assert_eq!(codec.decode(frame).unwrap().samples.len(), 160);
        }
    }

    #[test]
    fn pipeline_downmixes_stereo() {
        let mut pipeline = CapturePipeline::new(16_000, &settings());
        // 160 stereo frames, L=0.5 R=-0.5 → silence
        let samples: Vec<f32> = (0..320).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let chunk = AudioChunk {
            samples,
            sample_rate: 16_000,
            channels: 2,
        };
        let mut frames = Vec::new();
        pipeline.process(&chunk, |f| frames.push(f));

        assert_eq!(frames.len(), 1);
        let decoded = AudioCodec::new(16_000, 16_000).decode(&frames[0]).unwrap();
        assert!(decoded.samples.iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn zero_frame_size_from_config_is_clamped() {
        let cfg = AudioConfig {
            frame_samples: 0,
            ..AudioConfig::default()
        };
        let settings = CaptureSettings::from_config(&cfg);
        assert_eq!(settings.frame_samples, 1);
        assert_eq!(settings.capture_rate, 16_000);
    }

    #[test]
    fn pipeline_tolerates_zero_frame_size() {
        let zero = CaptureSettings {
            capture_rate: 16_000,
            frame_samples: 0,
        };
        let mut pipeline = CapturePipeline::new(16_000, &zero);
        let chunk = AudioChunk {
            samples: vec![0.0; 3],
            sample_rate: 16_000,
            channels: 1,
        };
        let mut frames = Vec::new();
        pipeline.process(&chunk, |f| frames.push(f));
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn handle_releases_once_on_explicit_release() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = CaptureHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_releases_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        drop(CaptureHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mock_microphone_denial_is_an_error() {
        let mic = MockMicrophone {
            deny: true,
            ..Default::default()
        };
        let err = mic.open(Arc::new(SendQueue::new(4))).await.err().unwrap();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
    }
}
