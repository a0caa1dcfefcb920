//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Decoders and microphones hand us whatever rate the host uses (commonly
//! 44.1 or 48 kHz). The engine requires 16 kHz mono f32. `RateConverter`
//! bridges that gap with a cubic polynomial interpolator, which is fully
//! deterministic for a given input.
//!
//! `convert` wraps a one-shot conversion of a whole signal: it compensates the
//! resampler's output delay, holds the last sample through the flush so the
//! tail does not decay toward silence, and pins the result to exactly
//! `round(len * to / from)` samples.
//!
//! When source rate == target rate the converter is a passthrough and no
//! rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let out = resample::convert(&mono, 48_000, 16_000)?; // Vec<f32> at 16 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Result, ScribeError};

/// Input frame count per rubato call.
pub const CHUNK_FRAMES: usize = 1024;

/// Upper bound on zero-fed flush rounds in `finish`.
const MAX_FLUSH_ROUNDS: usize = 16;

/// Input frames of held signal appended beyond the resampler delay.
const TAIL_HOLD_FRAMES: usize = 16;

/// Number of output samples `convert` produces: `round(frames * to / from)`.
///
/// Rounds half up and uses integer arithmetic so the result never depends on
/// float rounding of large lengths.
pub fn output_len(frames: usize, from: u32, to: u32) -> usize {
    if from == 0 {
        return 0;
    }
    let num = frames as u128 * to as u128;
    let den = from as u128;
    ((num * 2 + den) / (den * 2)) as usize
}

/// Resample a complete mono signal from `from` Hz to `to` Hz.
///
/// # Errors
/// `UnsupportedFormat` if rubato rejects the rate pair or fails mid-stream.
pub fn convert(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    let expected = output_len(samples.len(), from, to);
    if from == to {
        return Ok(samples.to_vec());
    }

    let Some(&last) = samples.last() else {
        return Ok(Vec::new());
    };

    let mut rc = RateConverter::new(from, to, CHUNK_FRAMES)?;
    let delay = rc.output_delay();

    // Hold the final sample past the end so the interpolator's tail never
    // reaches the zero padding used to flush it.
    let hold = output_len(delay + TAIL_HOLD_FRAMES, to, from) + TAIL_HOLD_FRAMES;
    let mut out = rc.process(samples)?;
    out.extend(rc.process(&vec![last; hold])?);
    out.extend(rc.finish(delay + expected)?);

    let skip = delay.min(out.len());
    out.drain(..skip);
    out.resize(expected, 0.0);
    Ok(out)
}

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input chunks carried between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    /// Output frames produced so far, including the resampler delay.
    produced: usize,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `source_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate expected by the engine (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `1024`).
    ///
    /// # Errors
    /// Returns `ScribeError::UnsupportedFormat` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                produced: 0,
            });
        }
        if source_rate == 0 || target_rate == 0 {
            return Err(ScribeError::UnsupportedFormat("sample rate is zero".into()));
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| ScribeError::UnsupportedFormat(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(
            source_rate,
            target_rate,
            chunk_size,
            max_out,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            produced: 0,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for `finish`.
    ///
    /// In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        let mut offset = 0;

        while self.input_buf.len() - offset >= self.chunk_size {
            let input_slice = &self.input_buf[offset..offset + self.chunk_size];
            let (_consumed, produced) = resampler
                .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                .map_err(|e| ScribeError::UnsupportedFormat(format!("resampler: {e}")))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            offset += self.chunk_size;
        }

        self.input_buf.drain(..offset);
        self.produced += result.len();
        Ok(result)
    }

    /// Flush the buffered remainder, then feed silence until at least
    /// `min_total` output frames have been produced over the converter's life.
    pub fn finish(&mut self, min_total: usize) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(std::mem::take(&mut self.input_buf));
        };

        let mut result = Vec::new();

        if !self.input_buf.is_empty() {
            let rest: [&[f32]; 1] = [&self.input_buf];
            let (_consumed, produced) = resampler
                .process_partial_into_buffer(Some(&rest[..]), &mut self.output_buf, None)
                .map_err(|e| ScribeError::UnsupportedFormat(format!("resampler: {e}")))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.clear();
        }

        let mut rounds = 0;
        while self.produced + result.len() < min_total && rounds < MAX_FLUSH_ROUNDS {
            let (_consumed, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
                .map_err(|e| ScribeError::UnsupportedFormat(format!("resampler: {e}")))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            rounds += 1;
        }

        self.produced += result.len();
        Ok(result)
    }

    /// Output frames of latency the resampler introduces.
    pub fn output_delay(&self) -> usize {
        self.resampler
            .as_ref()
            .map(|r| r.output_delay())
            .unwrap_or(0)
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(samples: &[f32]) -> f32 {
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples).unwrap();
        assert_eq!(out, samples);
        assert_eq!(convert(&samples, 16_000, 16_000).unwrap(), samples);
    }

    #[test]
    fn output_len_rounds_half_up() {
        assert_eq!(output_len(44_100, 44_100, 16_000), 16_000);
        assert_eq!(output_len(3, 48_000, 16_000), 1);
        // 1.5 → 2
        assert_eq!(output_len(3, 32_000, 16_000), 2);
        assert_eq!(output_len(0, 48_000, 16_000), 0);
        assert_eq!(output_len(10, 0, 16_000), 0);
    }

    #[test]
    fn convert_produces_exact_length_for_short_and_long_inputs() {
        for len in [1usize, 5, 1023, 1024, 1025, 48_000, 100_003] {
            let samples = vec![0.2f32; len];
            let out = convert(&samples, 48_000, 16_000).unwrap();
            assert_eq!(out.len(), output_len(len, 48_000, 16_000), "len={len}");
        }
    }

    #[test]
    fn upsampling_doubles_length() {
        let out = convert(&vec![0.0f32; 8_000], 8_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn upsampled_ramp_tail_stays_at_final_level() {
        let ramp: Vec<f32> = (1..=8_000).map(|i| i as f32 / 8_000.0).collect();
        let out = convert(&ramp, 8_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
        for s in &out[out.len() - 8..] {
            assert!((s - 1.0).abs() < 0.01, "tail sample {s}");
        }
    }

    #[test]
    fn constant_signal_survives_downsampling() {
        let out = convert(&vec![0.5f32; 48_000], 48_000, 16_000).unwrap();
        for (i, s) in out[200..out.len() - 200].iter().enumerate() {
            assert!((s - 0.5).abs() < 0.01, "sample {i} drifted to {s}");
        }
    }

    #[test]
    fn sine_energy_is_preserved() {
        let samples: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin())
            .collect();
        let out = convert(&samples, 48_000, 16_000).unwrap();
        let level = rms(&out[1_000..15_000]);
        assert!(
            (level - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05,
            "rms={level}"
        );
    }

    #[test]
    fn conversion_is_deterministic() {
        let samples: Vec<f32> = (0..30_000)
            .map(|i| ((i * 7919) % 200) as f32 / 200.0 - 0.5)
            .collect();
        let a = convert(&samples, 44_100, 16_000).unwrap();
        let b = convert(&samples, 44_100, 16_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 500]).unwrap();
        assert!(out.is_empty(), "expected empty output, got {}", out.len());
        let out2 = rc.process(&vec![0.0f32; 500]).unwrap();
        assert!(!out2.is_empty(), "second push should trigger processing");
    }
}
