//! Audio ingestion: decoded/recorded buffers and the format normalizer.
//!
//! ## Pipeline position
//!
//! ```text
//! wav::read_wav / capture::Recorder ──► AudioBuffer (any layout, any rate)
//!                                            │
//!                                       normalize()
//!                                            │
//!                                  NormalizedSamples (mono f32 @ 16 kHz)
//! ```
//!
//! `normalize` never mutates its input; the only side effect is the
//! allocation of the output vector.

#[cfg(feature = "audio-cpal")]
pub mod capture;
pub mod resample;
pub mod wav;

use tracing::debug;

use crate::error::{Result, ScribeError};

/// Sample rate the inference engine consumes (Hz).
pub const ENGINE_SAMPLE_RATE: u32 = 16_000;

/// Raw decoded or recorded audio, one sample vector per channel.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from per-channel (planar) sample arrays.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Convenience constructor for single-channel audio.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Build a buffer from interleaved frames (`L R L R ...`).
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        Self::new(deinterleave(samples, channel_count), sample_rate)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Per-channel length in samples (0 when there are no channels).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Mono f32 samples at the engine rate. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSamples {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl NormalizedSamples {
    /// Wrap already-normalized mono samples.
    ///
    /// # Errors
    /// `UnsupportedFormat` when `samples` is empty or `sample_rate` is zero.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(ScribeError::UnsupportedFormat(
                "normalized audio must contain at least one sample".into(),
            ));
        }
        if sample_rate == 0 {
            return Err(ScribeError::UnsupportedFormat("sample rate is zero".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false`; kept for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Drop everything past `max_secs`. Returns `true` if samples were removed.
    pub fn truncate_secs(&mut self, max_secs: f64) -> bool {
        let max_len = (max_secs * self.sample_rate as f64).round() as usize;
        if max_len == 0 || self.samples.len() <= max_len {
            return false;
        }
        self.samples.truncate(max_len);
        true
    }
}

/// Convert any `AudioBuffer` into mono f32 at `target_rate`.
///
/// Channels are averaged sample-by-sample, then the mono signal is resampled
/// to produce exactly `round(frames * target_rate / sample_rate)` samples.
///
/// # Errors
/// `UnsupportedFormat` for zero channels, zero frames, a zero sample rate,
/// channels of differing length, or input so short it rounds to no output.
pub fn normalize(buffer: &AudioBuffer, target_rate: u32) -> Result<NormalizedSamples> {
    if buffer.channel_count() == 0 {
        return Err(ScribeError::UnsupportedFormat("buffer has no channels".into()));
    }
    if buffer.sample_rate() == 0 || target_rate == 0 {
        return Err(ScribeError::UnsupportedFormat("sample rate is zero".into()));
    }
    let frames = buffer.frames();
    if frames == 0 {
        return Err(ScribeError::UnsupportedFormat("buffer has no samples".into()));
    }
    if let Some(ragged) = buffer.channels().iter().position(|c| c.len() != frames) {
        return Err(ScribeError::UnsupportedFormat(format!(
            "channel {ragged} has {} samples, expected {frames}",
            buffer.channels()[ragged].len()
        )));
    }

    let expected = resample::output_len(frames, buffer.sample_rate(), target_rate);
    if expected == 0 {
        return Err(ScribeError::UnsupportedFormat(format!(
            "{frames} samples at {} Hz is too short to resample",
            buffer.sample_rate()
        )));
    }

    let mono = mix_to_mono(buffer.channels());
    let samples = resample::convert(&mono, buffer.sample_rate(), target_rate)?;

    debug!(
        channels = buffer.channel_count(),
        source_rate = buffer.sample_rate(),
        target_rate,
        frames_in = frames,
        frames_out = samples.len(),
        "normalized audio buffer"
    );

    NormalizedSamples::new(samples, target_rate)
}

/// Arithmetic mean across channels at each time index.
///
/// All channels must share the first channel's length.
pub fn mix_to_mono(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [only] => only.clone(),
        [first, rest @ ..] => {
            let mut mixed = first.clone();
            for channel in rest {
                for (acc, s) in mixed.iter_mut().zip(channel) {
                    *acc += *s;
                }
            }
            let scale = 1.0 / channels.len() as f32;
            for s in &mut mixed {
                *s *= scale;
            }
            mixed
        }
    }
}

/// Split interleaved frames into planar channels.
pub fn deinterleave(samples: &[f32], channel_count: usize) -> Vec<Vec<f32>> {
    if channel_count == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channel_count;
    let mut planar = vec![Vec::with_capacity(frames); channel_count];
    for frame in samples.chunks_exact(channel_count) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
    planar
}
