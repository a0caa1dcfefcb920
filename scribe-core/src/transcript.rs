//! Transcript types and the cross-chunk merge.
//!
//! Chunks overlap, so the same words can be reported twice: once near the end
//! of chunk N and again near the start of chunk N+1. `merge_into` rebases a
//! chunk's segments onto the global timeline and keeps the earlier chunk's
//! version of anything inside the shared region.

use serde::{Deserialize, Serialize};

/// One timestamped piece of text. Times are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Copy of this segment moved `offset_secs` later.
    pub fn shifted(&self, offset_secs: f64) -> Self {
        Self {
            start: self.start + offset_secs,
            end: self.end + offset_secs,
            text: self.text.clone(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Ordered segments on the global timeline of the submitted audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub segments: Vec<Segment>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last_start(&self) -> Option<f64> {
        self.segments.last().map(|s| s.start)
    }

    /// Largest end time among retained segments.
    pub fn last_end(&self) -> Option<f64> {
        self.segments.iter().map(|s| s.end).reduce(f64::max)
    }

    /// Plain text with segments joined by single spaces.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How many of a chunk's segments survived the merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub kept: usize,
    pub discarded: usize,
}

/// Pure form of [`merge_into`]: returns a new transcript, `previous` is untouched.
pub fn merge(
    previous: &Transcript,
    chunk_segments: &[Segment],
    chunk_start_secs: f64,
    overlap_secs: f64,
) -> Transcript {
    let mut next = previous.clone();
    merge_into(&mut next, chunk_segments, chunk_start_secs, overlap_secs);
    next
}

/// Append one chunk's chunk-local segments to `transcript`.
///
/// A rebased segment is dropped when it starts inside the overlap region
/// (`< chunk_start + overlap`) and before the end of what is already retained,
/// or when it would start before the last retained segment. Everything else is
/// appended in order, so starts stay non-decreasing.
pub fn merge_into(
    transcript: &mut Transcript,
    chunk_segments: &[Segment],
    chunk_start_secs: f64,
    overlap_secs: f64,
) -> MergeStats {
    let overlap_end = chunk_start_secs + overlap_secs.max(0.0);
    let retained_end = transcript.last_end();
    let mut last_start = transcript.last_start();
    let mut stats = MergeStats::default();

    for segment in chunk_segments {
        let rebased = segment.shifted(chunk_start_secs);

        let duplicated = rebased.start < overlap_end
            && retained_end.is_some_and(|end| rebased.start < end);
        let out_of_order = last_start.is_some_and(|start| rebased.start < start);

        if duplicated || out_of_order {
            stats.discarded += 1;
            continue;
        }

        last_start = Some(rebased.start);
        transcript.segments.push(rebased);
        stats.kept += 1;
    }

    stats
}
