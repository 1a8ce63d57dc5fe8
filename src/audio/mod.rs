//! Audio pipeline: microphone capture, wire codec, and speaker playback.
//!
//! # Capture (outbound)
//!
//! ```text
//! Microphone → cpal callback → AudioChunk → downmix → StreamingResampler
//!           → FrameAssembler → AudioCodec::encode → SendQueue
//! ```
//!
//! # Playback (inbound)
//!
//! ```text
//! WireAudio → AudioCodec::decode → PlaybackScheduler::enqueue
//!           → PlaybackDevice (cpal mixer, sample-accurate start times)
//! ```

pub mod capture;
pub mod codec;
pub mod frames;
pub mod output;
pub mod playback;
pub mod resample;

pub use capture::{
    AudioChunk, CaptureError, CaptureHandle, CapturePipeline, CaptureSettings, CpalMicrophone,
    MicrophoneSource,
};
pub use codec::{AudioCodec, CodecError, PlayableBuffer, WireAudio, PCM_MIME};
pub use frames::FrameAssembler;
pub use output::CpalSpeaker;
pub use playback::{
    PlaybackDevice, PlaybackError, PlaybackOutput, PlaybackScheduler, ScheduledAudio,
    UnavailableDevice, VoiceId,
};
pub use resample::{downmix_to_mono, resample_linear, StreamingResampler};
