//! Audio frame codec: capture samples ⇄ wire audio.
//!
//! The remote channel speaks **16-bit little-endian PCM, mono**, carried as
//! base64 text together with a MIME type such as `audio/pcm;rate=16000`.
//!
//! * [`AudioCodec::encode`] turns a block of `f32` capture samples in
//!   `[-1.0, 1.0]` into a [`WireAudio`] frame.
//! * [`AudioCodec::decode`] turns an inbound [`WireAudio`] chunk into a
//!   [`PlayableBuffer`], rejecting anything it cannot interpret with
//!   [`CodecError::MalformedAudioChunk`].
//!
//! Both directions are pure: the same input always yields the same output.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// MIME base type for raw PCM audio on the wire.
pub const PCM_MIME: &str = "audio/pcm";

/// A base64 PCM blob as it travels over the channel (either direction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAudio {
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64-encoded PCM16LE bytes.
    pub data: String,
}

/// Decoded mono audio ready to be scheduled on the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
}

impl PlayableBuffer {
    /// Playback length in seconds. Zero for an empty buffer or a zero rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Errors raised while decoding inbound audio.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed audio chunk: {0}")]
    MalformedAudioChunk(String),
}

// ---------------------------------------------------------------------------
// AudioCodec
// ---------------------------------------------------------------------------

/// Stateless PCM16 codec bound to the negotiated wire rates.
#[derive(Debug, Clone, Copy)]
pub struct AudioCodec {
    capture_rate: u32,
    playback_rate: u32,
}

impl AudioCodec {
    /// `capture_rate` is stamped on outbound frames; `playback_rate` is the
    /// fallback for inbound chunks whose MIME type carries no `rate=`.
    pub fn new(capture_rate: u32, playback_rate: u32) -> Self {
        Self {
            capture_rate,
            playback_rate,
        }
    }

    /// Encode one capture frame.
    ///
    /// Samples are clamped to `[-1.0, 1.0]` and scaled by 32 768; the cast to
    /// `i16` saturates so `1.0` maps to `i16::MAX`.
    pub fn encode(&self, frame: &[f32]) -> WireAudio {
        let mut pcm = Vec::with_capacity(frame.len() * 2);
        for &sample in frame {
            let value = (sample.clamp(-1.0, 1.0) * 32_768.0) as i16;
            pcm.extend_from_slice(&value.to_le_bytes());
        }

        WireAudio {
            mime_type: format!("{PCM_MIME};rate={}", self.capture_rate),
            data: B64.encode(&pcm),
        }
    }

    /// Decode one inbound chunk.
    ///
    /// # Errors
    ///
    /// [`CodecError::MalformedAudioChunk`] when the MIME type is not PCM,
    /// the payload is not valid base64, or the byte count is odd.
    pub fn decode(&self, chunk: &WireAudio) -> Result<PlayableBuffer, CodecError> {
        let media_type = chunk.mime_type.split(';').next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(PCM_MIME) {
            return Err(CodecError::MalformedAudioChunk(format!(
                "unsupported mime type {:?}",
                chunk.mime_type
            )));
        }

        let bytes = B64
            .decode(chunk.data.as_bytes())
            .map_err(|e| CodecError::MalformedAudioChunk(format!("invalid base64: {e}")))?;

        if bytes.len() % 2 != 0 {
            return Err(CodecError::MalformedAudioChunk(format!(
                "odd PCM16 byte length {}",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
            .collect();

        Ok(PlayableBuffer {
            samples,
            sample_rate: parse_rate(&chunk.mime_type).unwrap_or(self.playback_rate),
        })
    }
}

/// Extract the `rate=` parameter from a MIME type such as
/// `audio/pcm;rate=24000`.
pub fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|&rate| rate > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
