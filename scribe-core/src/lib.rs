//! # scribe
//!
//! Client-side chunked transcription core.
//!
//! ## Architecture
//!
//! ```text
//! AudioBuffer ─► audio::normalize ─► buffering::chunk::plan
//!                                          │
//!                            Transcriber::submit_job (single flight)
//!                                          │
//!                         per chunk: EngineSession::run (spawn_blocking)
//!                                          │
//!                               transcript::merge_into ─► ProgressEvent
//!                                          │
//!                                     JobOutcome
//! ```
//!
//! The speech engine is an opaque `SpeechEngine` implementor behind a mutex;
//! at most one chunk is in flight at any time.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod transcript;

// Convenience re-exports for downstream crates
pub use audio::{normalize, AudioBuffer, NormalizedSamples};
pub use buffering::chunk::{plan, Chunk};
pub use config::ScribeConfig;
pub use engine::{JobHandle, JobOptions, Transcriber};
pub use error::{ErrorKind, ScribeError};
pub use inference::{EngineHandle, EngineSession, SessionConfig, SpeechEngine, StubEngine};
pub use ipc::events::{
    EngineState, EngineStateEvent, JobError, JobOutcome, JobStatus, ProgressEvent,
};
pub use transcript::{merge, Segment, Transcript};

#[cfg(feature = "audio-cpal")]
pub use audio::capture::Recorder;
