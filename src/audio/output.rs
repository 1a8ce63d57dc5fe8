//! Speaker output via `cpal`.
//!
//! [`CpalSpeaker`] opens the default output device and returns a
//! [`CpalPlaybackDevice`].  The device clock is the number of frames the
//! output callback has rendered so far, so "start at *t* seconds" becomes
//! "start at frame *t · rate*" and scheduling is sample-accurate.
//!
//! The callback mixes every voice that overlaps the frames it is rendering
//! and reports voices that have played to the end on the `ended` channel.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use crate::audio::capture::{StreamThread, StreamThreadError};
use crate::audio::codec::PlayableBuffer;
use crate::audio::playback::{PlaybackDevice, PlaybackError, PlaybackOutput, VoiceId};
use crate::audio::resample::resample_linear;

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// State shared between the session thread and the output callback.
struct Mixer {
    voices: Vec<Voice>,
    /// Frames rendered since the stream started.
    clock: u64,
    sample_rate: u32,
    ended: mpsc::UnboundedSender<VoiceId>,
}

impl Mixer {
    fn new(sample_rate: u32, ended: mpsc::UnboundedSender<VoiceId>) -> Self {
        Self {
            voices: Vec::new(),
            clock: 0,
            sample_rate,
            ended,
        }
    }

    /// Fill one interleaved output buffer and advance the clock.
    fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }

        let frames = (out.len() / channels) as u64;
        let base = self.clock;
        let limit = base + frames;

        for voice in &self.voices {
            let from = voice.start_frame.max(base);
            let to = voice.end_frame().min(limit);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let offset = (frame - base) as usize * channels;
                for slot in &mut out[offset..offset + channels] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.clock = limit;

        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.end_frame() <= limit {
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });
    }

    /// Add a voice that should begin at `requested`.
    ///
    /// If the callback has already rendered past `requested`, the head that
    /// would have played is cut so the voice still ends on its scheduled
    /// frame and the next buffer abuts it.
    fn place(&mut self, id: VoiceId, requested: u64, mut samples: Vec<f32>) {
        let late = self.clock.saturating_sub(requested) as usize;
        if late > 0 {
            samples.drain(..late.min(samples.len()));
        }
        self.voices.push(Voice {
            id,
            start_frame: requested.max(self.clock),
            samples,
        });
    }

    fn now(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.clock as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// CpalPlaybackDevice
// ---------------------------------------------------------------------------

pub struct CpalPlaybackDevice {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    _thread: StreamThread,
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn now(&self) -> f64 {
        self.mixer.lock().unwrap_or_else(|e| e.into_inner()).now()
    }

    fn start(
        &mut self,
        id: VoiceId,
        buffer: &PlayableBuffer,
        start_at: f64,
    ) -> Result<(), PlaybackError> {
        if buffer.sample_rate == 0 {
            return Err(PlaybackError::Rejected("zero sample rate".into()));
        }

        let samples = resample_linear(&buffer.samples, buffer.sample_rate, self.sample_rate);
        let requested = (start_at * self.sample_rate as f64).round().max(0.0) as u64;

        self.mixer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .place(id, requested, samples);
        Ok(())
    }

    fn stop(&mut self, id: VoiceId) {
        self.mixer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .voices
            .retain(|voice| voice.id != id);
    }
}

// ---------------------------------------------------------------------------
// CpalSpeaker
// ---------------------------------------------------------------------------

/// Opens the default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSpeaker;

#[async_trait]
impl PlaybackOutput for CpalSpeaker {
    async fn open(
        &self,
        ended: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Box<dyn PlaybackDevice>, PlaybackError> {
        let mixer = Arc::new(Mutex::new(Mixer::new(0, ended)));
        let callback_mixer = Arc::clone(&mixer);

        // The device is opened on the stream thread itself; the rate reaches
        // us through the shared mixer.
        let thread = tokio::task::spawn_blocking(move || {
            StreamThread::spawn("speaker-stream", move || open_output_stream(callback_mixer))
        })
        .await
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?
        .map_err(|e| match e {
            StreamThreadError::Build(inner) => inner,
            other => PlaybackError::DeviceUnavailable(other.to_string()),
        })?;

        let sample_rate = mixer.lock().unwrap_or_else(|e| e.into_inner()).sample_rate;

        Ok(Box::new(CpalPlaybackDevice {
            mixer,
            sample_rate,
            _thread: thread,
        }))
    }
}

fn open_output_stream(mixer: Arc<Mutex<Mixer>>) -> Result<cpal::Stream, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::DeviceUnavailable("no output device on default host".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();

    mixer.lock().unwrap_or_else(|e| e.into_inner()).sample_rate = sample_rate;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .render(data, channels);
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
    stream
        .play()
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

    log::info!("playback: output started ({sample_rate} Hz, {channels} ch)");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
