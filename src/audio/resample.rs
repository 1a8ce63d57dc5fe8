//! Audio resampling and channel mixing utilities.
//!
//! The wire wants **mono `f32` at the negotiated capture rate** on the way
//! out, and the output device wants the decoded model audio at its own native
//! rate on the way back.  This module provides:
//!
//! 1. [`downmix_to_mono`]: average any number of interleaved channels.
//! 2. [`resample_linear`]: one-shot linear resampler for whole buffers
//!    (used on decoded playback buffers).
//! 3. [`StreamingResampler`]: stateful resampler for the capture stream.
//!    Uses `rubato`'s `FftFixedIn` so chunk boundaries stay continuous, and
//!    falls back to streaming linear interpolation if rubato rejects the
//!    rate pair.

use rubato::{FftFixedIn, Resampler};

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// ```rust
/// use voice_copilot::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample `samples` from `source_rate` to `target_rate` Hz using linear
/// interpolation.
///
/// * Equal rates return a copy of the input.
/// * Empty input, or a zero rate on either side, returns an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// ```rust
/// use voice_copilot::audio::resample_linear;
///
/// let hi = vec![0.5_f32; 480];
/// let lo = resample_linear(&hi, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);
/// ```
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac as f32) + samples[idx + 1] * frac as f32
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// StreamingResampler
// ---------------------------------------------------------------------------

/// Input chunk size handed to rubato.
const FFT_CHUNK: usize = 1024;

enum Inner {
    Passthrough,
    Fft {
        resampler: FftFixedIn<f32>,
        pending: Vec<f32>,
    },
    Linear {
        step: f64,
        pos: f64,
        prev: Option<f32>,
    },
}

/// Stateful mono resampler for a continuous capture stream.
///
/// Output is produced in whole rubato chunks, so a few milliseconds of audio
/// may sit in the internal buffer between calls.
pub struct StreamingResampler {
    inner: Inner,
}

impl StreamingResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let inner = if source_rate == target_rate {
            Inner::Passthrough
        } else {
            match FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                FFT_CHUNK,
                2,
                1,
            ) {
                Ok(resampler) => Inner::Fft {
                    resampler,
                    pending: Vec::with_capacity(FFT_CHUNK * 2),
                },
                Err(e) => {
                    log::warn!(
                        "resample: rubato rejected {source_rate}->{target_rate} Hz ({e}); using linear"
                    );
                    Inner::Linear {
                        step: source_rate as f64 / target_rate.max(1) as f64,
                        pos: 0.0,
                        prev: None,
                    }
                }
            }
        };

        Self { inner }
    }

    /// Feed mono samples at `source_rate`; returns whatever output is ready.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        match &mut self.inner {
            Inner::Passthrough => input.to_vec(),
            Inner::Fft { resampler, pending } => {
                pending.extend_from_slice(input);
                let mut output = Vec::new();

                loop {
                    let needed = resampler.input_frames_next();
                    if pending.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = pending.drain(..needed).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(channels) => {
                            if let Some(mono) = channels.into_iter().next() {
                                output.extend(mono);
                            }
                        }
                        Err(e) => log::warn!("resample: rubato process failed: {e}"),
                    }
                }

                output
            }
            Inner::Linear { step, pos, prev } => {
                if input.is_empty() {
                    return Vec::new();
                }

                // Index 0 is the last sample of the previous call, if any.
                let mut src = Vec::with_capacity(input.len() + 1);
                if let Some(p) = *prev {
                    src.push(p);
                }
                src.extend_from_slice(input);

                let mut output = Vec::with_capacity((input.len() as f64 / *step) as usize + 1);
                while *pos + 1.0 < src.len() as f64 {
                    let idx = pos.floor() as usize;
                    let frac = (*pos - idx as f64) as f32;
                    output.push(src[idx] * (1.0 - frac) + src[idx + 1] * frac);
                    *pos += *step;
                }

                *pos -= (src.len() - 1) as f64;
                *prev = src.last().copied();
                output
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
