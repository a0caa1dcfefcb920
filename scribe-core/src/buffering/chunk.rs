//! Chunk planner: splits a normalized stream into overlap-aware sub-ranges
//! that can each be submitted to the engine on their own.
//!
//! ## Layout
//!
//! ```text
//! max = 30 s, overlap = 5 s, 90 s input
//!
//! |0 ───────── 30|
//!           |25 ───────── 55|
//!                      |50 ───────── 80|
//!                            |65 ──────── 90|   final chunk, pulled back
//! ```
//!
//! Regular chunks are exactly `max` long and start `max - overlap` apart.
//! The final chunk always ends at the end of the input. When the tail is
//! shorter than `max - overlap`, the final chunk is pulled back so it is
//! `max - overlap` long, giving the engine enough context for a short tail.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::audio::NormalizedSamples;
use crate::error::{Result, ScribeError};

/// A contiguous sub-range of the normalized stream, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Position in the plan (0-based).
    pub index: usize,
    /// First sample (inclusive).
    pub start: usize,
    /// One past the last sample.
    pub end: usize,
    /// Samples shared with the previous chunk; 0 for the first chunk.
    pub overlap: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn start_secs(&self, sample_rate: u32) -> f64 {
        self.start as f64 / sample_rate as f64
    }

    pub fn end_secs(&self, sample_rate: u32) -> f64 {
        self.end as f64 / sample_rate as f64
    }

    pub fn overlap_secs(&self, sample_rate: u32) -> f64 {
        self.overlap as f64 / sample_rate as f64
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.len() as f64 / sample_rate as f64
    }

    /// Borrow this chunk's samples out of the stream it was planned for.
    pub fn samples<'a>(&self, stream: &'a NormalizedSamples) -> &'a [f32] {
        &stream.samples()[self.range()]
    }
}

/// Plan chunks for `samples`.
///
/// # Errors
/// `InvalidChunkConfig` when either duration is non-positive or not finite,
/// when `max_chunk_secs <= overlap_secs`, or when the durations round to a
/// zero-sample overlap or step at the stream's rate.
pub fn plan(
    samples: &NormalizedSamples,
    max_chunk_secs: f64,
    overlap_secs: f64,
) -> Result<Vec<Chunk>> {
    plan_frames(
        samples.len(),
        samples.sample_rate(),
        max_chunk_secs,
        overlap_secs,
    )
}

/// Plan chunks for a stream of `total` samples at `sample_rate`.
pub fn plan_frames(
    total: usize,
    sample_rate: u32,
    max_chunk_secs: f64,
    overlap_secs: f64,
) -> Result<Vec<Chunk>> {
    validate(max_chunk_secs, overlap_secs)?;

    let max_len = secs_to_samples(max_chunk_secs, sample_rate);
    let overlap_len = secs_to_samples(overlap_secs, sample_rate);
    if overlap_len == 0 || max_len <= overlap_len {
        return Err(ScribeError::InvalidChunkConfig(format!(
            "max {max_chunk_secs}s / overlap {overlap_secs}s round to \
             {max_len}/{overlap_len} samples at {sample_rate} Hz"
        )));
    }
    let step = max_len - overlap_len;

    if total <= max_len {
        return Ok(vec![Chunk {
            index: 0,
            start: 0,
            end: total,
            overlap: 0,
        }]);
    }

    let mut chunks: Vec<Chunk> = Vec::with_capacity(total / step + 1);
    let mut start = 0usize;
    loop {
        let prev_end = chunks.last().map(|c| c.end);
        if start + max_len >= total {
            // `start > 0` here, and the previous chunk ended before `total`,
            // so `total - step` is past the previous start.
            let final_start = start.min(total - step);
            chunks.push(Chunk {
                index: chunks.len(),
                start: final_start,
                end: total,
                overlap: prev_end.map_or(0, |end| end.saturating_sub(final_start)),
            });
            break;
        }
        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end: start + max_len,
            overlap: prev_end.map_or(0, |end| end.saturating_sub(start)),
        });
        start += step;
    }

    Ok(chunks)
}

fn validate(max_chunk_secs: f64, overlap_secs: f64) -> Result<()> {
    if !max_chunk_secs.is_finite() || !overlap_secs.is_finite() {
        return Err(ScribeError::InvalidChunkConfig(
            "chunk durations must be finite".into(),
        ));
    }
    if max_chunk_secs <= 0.0 || overlap_secs <= 0.0 {
        return Err(ScribeError::InvalidChunkConfig(format!(
            "chunk durations must be positive (max {max_chunk_secs}s, overlap {overlap_secs}s)"
        )));
    }
    if max_chunk_secs <= overlap_secs {
        return Err(ScribeError::InvalidChunkConfig(format!(
            "max chunk {max_chunk_secs}s must exceed overlap {overlap_secs}s"
        )));
    }
    Ok(())
}

fn secs_to_samples(secs: f64, sample_rate: u32) -> usize {
    (secs * sample_rate as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn secs(n: f64) -> usize {
        secs_to_samples(n, RATE)
    }

    #[test]
    fn ninety_seconds_plans_four_chunks_with_pulled_back_tail() {
        let chunks = plan_frames(secs(90.0), RATE, 30.0, 5.0).unwrap();
        let starts: Vec<f64> = chunks.iter().map(|c| c.start_secs(RATE)).collect();
        assert_eq!(starts, vec![0.0, 25.0, 50.0, 65.0]);

        let last = chunks.last().unwrap();
        assert_eq!(last.end, secs(90.0));
        assert_eq!(last.len(), secs(25.0));
        assert_eq!(chunks[1].overlap, secs(5.0));
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn short_input_is_one_chunk_without_overlap() {
        let samples = NormalizedSamples::new(vec![0.0; secs(12.0)], RATE).unwrap();
        let chunks = plan(&samples, 30.0, 5.0).unwrap();
        assert_eq!(
            chunks,
            vec![Chunk {
                index: 0,
                start: 0,
                end: secs(12.0),
                overlap: 0
            }]
        );

        let exact = plan_frames(secs(30.0), RATE, 30.0, 5.0).unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn long_tail_keeps_regular_step() {
        let chunks = plan_frames(secs(100.0), RATE, 30.0, 5.0).unwrap();
        let starts: Vec<f64> = chunks.iter().map(|c| c.start_secs(RATE)).collect();
        assert_eq!(starts, vec![0.0, 25.0, 50.0, 75.0]);
        assert_eq!(chunks[3].overlap, secs(5.0));
    }

    #[test]
    fn rejects_invalid_configs() {
        for (max, overlap) in [
            (5.0, 5.0),
            (4.0, 5.0),
            (0.0, 1.0),
            (30.0, 0.0),
            (-30.0, 5.0),
            (30.0, -1.0),
            (f64::NAN, 1.0),
            (30.0, f64::INFINITY),
        ] {
            let err = plan_frames(secs(90.0), RATE, max, overlap).unwrap_err();
            assert!(
                matches!(err, ScribeError::InvalidChunkConfig(_)),
                "max={max} overlap={overlap}"
            );
        }
    }

    #[test]
    fn plans_cover_input_exactly_with_fixed_overlap() {
        for (max, overlap) in [(30.0, 5.0), (10.0, 1.0), (20.0, 19.0), (7.5, 0.25)] {
            let max_len = secs(max);
            let overlap_len = secs(overlap);
            for total_secs in [max + 0.001, max * 1.5, max * 2.0, max * 3.7, 601.3] {
                let total = secs(total_secs);
                let chunks = plan_frames(total, RATE, max, overlap).unwrap();
                let ctx = format!("max={max} overlap={overlap} total={total_secs}");

                assert_eq!(chunks[0].start, 0, "{ctx}");
                assert_eq!(chunks.last().unwrap().end, total, "{ctx}");
                for (i, c) in chunks.iter().enumerate() {
                    assert_eq!(c.index, i, "{ctx}");
                    assert!(!c.is_empty() && c.len() <= max_len, "{ctx}");
                }
                for (n, pair) in chunks.windows(2).enumerate() {
                    let (a, b) = (pair[0], pair[1]);
                    assert!(b.start > a.start, "{ctx}");
                    assert!(b.start <= a.end, "gap between chunks: {ctx}");
                    assert_eq!(b.overlap, a.end - b.start, "{ctx}");
                    if n + 2 < chunks.len() {
                        assert_eq!(b.overlap, overlap_len, "{ctx}");
                    }
                }

                // Deduplicated union: each chunk contributes [max(start, prev_end), end).
                let mut covered = 0usize;
                let mut prev_end = 0usize;
                for c in &chunks {
                    covered += c.end - c.start.max(prev_end);
                    prev_end = c.end;
                }
                assert_eq!(covered, total, "{ctx}");
            }
        }
    }

    #[test]
    fn chunk_borrows_its_samples() {
        let samples =
            NormalizedSamples::new((0..secs(40.0)).map(|i| i as f32).collect(), RATE).unwrap();
        let chunks = plan(&samples, 30.0, 5.0).unwrap();
        let second = chunks[1].samples(&samples);
        assert_eq!(second.len(), chunks[1].len());
        assert_eq!(second[0], chunks[1].start as f32);
    }
}
