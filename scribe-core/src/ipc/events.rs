//! Event types emitted to callers while jobs run.
//!
//! | Event | Delivered via |
//! |-------|---------------|
//! | `ProgressEvent` | `JobHandle::subscribe_progress` / `on_progress` |
//! | `JobOutcome` | `JobHandle::wait` / `on_complete` |
//! | `EngineStateEvent` | `Transcriber::subscribe_engine_state` |

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ScribeError};
use crate::transcript::{Segment, Transcript};

// ---------------------------------------------------------------------------
// Job events
// ---------------------------------------------------------------------------

/// Lifecycle of one transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Chunk plan computed, nothing submitted yet.
    Planned,
    /// Chunks are being submitted one at a time.
    Running,
    /// Every chunk was processed.
    Completed,
    /// Stopped early on caller request; transcript is partial.
    Cancelled,
    /// An engine error ended the job; transcript is partial.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Emitted after each chunk's segments have been merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: u64,
    /// 0-based index of the chunk that just finished.
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// End of the finished chunk on the global timeline.
    pub processed_secs: f64,
    pub total_secs: f64,
    /// Segments this chunk contributed after overlap resolution.
    pub segments: Vec<Segment>,
}

impl ProgressEvent {
    /// Completed fraction in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        (self.chunk_index + 1) as f64 / self.total_chunks as f64
    }
}

/// Failure details attached to a `Failed` outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub kind: ErrorKind,
    /// 0-based index of the chunk whose submission failed, if any.
    pub chunk_index: Option<usize>,
    pub message: String,
}

impl JobError {
    pub fn new(error: &ScribeError, chunk_index: Option<usize>) -> Self {
        Self {
            kind: error.kind(),
            chunk_index,
            message: error.to_string(),
        }
    }
}

/// Final report delivered exactly once per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: u64,
    pub status: JobStatus,
    /// Full transcript when completed, partial otherwise.
    pub transcript: Transcript,
    pub error: Option<JobError>,
}

// ---------------------------------------------------------------------------
// Engine events
// ---------------------------------------------------------------------------

/// Readiness of the engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No model instance is loaded.
    Unloaded,
    /// A model is being loaded; `run` is not valid yet.
    Loading,
    /// A model instance is loaded and accepts chunks.
    Ready,
    /// The last load attempt failed.
    LoadFailed,
}

/// Published whenever the engine state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStateEvent {
    pub state: EngineState,
    pub model_id: Option<String>,
    /// Optional human-readable detail (e.g. load error message).
    pub detail: Option<String>,
}

impl EngineStateEvent {
    pub fn unloaded() -> Self {
        Self {
            state: EngineState::Unloaded,
            model_id: None,
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_serializes_with_camel_case_fields() {
        let event = ProgressEvent {
            job_id: 4,
            chunk_index: 1,
            total_chunks: 4,
            processed_secs: 55.0,
            total_secs: 90.0,
            segments: vec![Segment::new(30.0, 33.5, "hello")],
        };

        let json = serde_json::to_value(&event).expect("serialize progress");
        assert_eq!(json["jobId"], 4);
        assert_eq!(json["chunkIndex"], 1);
        assert_eq!(json["totalChunks"], 4);
        assert_eq!(json["segments"][0]["text"], "hello");
        assert!((event.fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn failed_outcome_carries_kind_and_chunk_index() {
        let outcome = JobOutcome {
            job_id: 1,
            status: JobStatus::Failed,
            transcript: Transcript::default(),
            error: Some(JobError::new(
                &ScribeError::Inference("oom".into()),
                Some(2),
            )),
        };

        let json = serde_json::to_value(&outcome).expect("serialize outcome");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "inference");
        assert_eq!(json["error"]["chunkIndex"], 2);

        let round_trip: JobOutcome = serde_json::from_value(json).expect("deserialize outcome");
        assert_eq!(round_trip.status, JobStatus::Failed);
        assert_eq!(round_trip.error.and_then(|e| e.chunk_index), Some(2));
    }

    #[test]
    fn engine_state_serializes_lowercase() {
        let event = EngineStateEvent {
            state: EngineState::LoadFailed,
            model_id: Some("tiny.en".into()),
            detail: Some("out of memory".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize engine state");
        assert_eq!(json["state"], "loadfailed");
        assert_eq!(json["modelId"], "tiny.en");
    }

    #[test]
    fn job_status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<JobStatus>(r#""Running""#).is_err());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
