//! Speech engine abstraction.
//!
//! The `SpeechEngine` trait is the boundary to the precompiled inference
//! module: it can load model instances, run one over a block of samples, and
//! free them. Nothing in this crate looks inside the model.
//!
//! `&mut self` on every method expresses that the engine owns mutable
//! internal buffers. All calls are therefore serialised through
//! `EngineHandle`'s `parking_lot::Mutex`.

pub mod models;
pub mod session;
pub mod stub;

pub use session::{EngineSession, SessionConfig};
pub use stub::StubEngine;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque identifier of a loaded model instance inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u32);

/// Per-call decoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    /// ISO-639-1 code, or `"auto"` for detection.
    pub language: String,
    /// Upper bound on the engine's internal worker threads.
    pub thread_count: usize,
    /// Translate into English instead of transcribing.
    pub translate: bool,
}

/// One segment exactly as the engine reports it.
///
/// Timestamps are in engine ticks of 10 ms, relative to the submitted block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSegment {
    pub t0: i64,
    pub t1: i64,
    pub text: String,
}

/// Contract for the inference engine module.
pub trait SpeechEngine: Send + 'static {
    /// Load and initialise a model instance. May take seconds; callers run it
    /// on a blocking thread.
    ///
    /// # Errors
    /// `EngineLoad` if the model cannot be initialised (missing weights,
    /// allocation failure).
    fn load(&mut self, model_id: &str) -> Result<InstanceId>;

    /// Run the model over mono 16 kHz samples.
    ///
    /// # Errors
    /// `EngineNotReady` for an unknown/freed instance, `Inference` for any
    /// failure inside the model.
    fn run(
        &mut self,
        instance: InstanceId,
        samples: &[f32],
        params: &RunParams,
    ) -> Result<Vec<RawSegment>>;

    /// Release an instance. Freeing an unknown instance is a no-op.
    fn free(&mut self, instance: InstanceId);
}

/// Thread-safe reference-counted handle to any `SpeechEngine` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning behaviour if an engine call
/// panics on a blocking thread.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn SpeechEngine>>);

impl EngineHandle {
    /// Wrap any `SpeechEngine` in an `EngineHandle`.
    pub fn new<E: SpeechEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
