//! `StubEngine`: placeholder backend that describes its input instead of
//! running a model.
//!
//! Used by the CLI and tests so the whole normalize → plan → run → merge path
//! can be exercised without model weights. Output is a pure function of the
//! input samples, so repeated runs produce identical transcripts.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, ScribeError};
use crate::inference::{models, InstanceId, RawSegment, RunParams, SpeechEngine};

/// Ticks (10 ms) per stub segment: one segment per 5 s window.
const WINDOW_TICKS: i64 = 500;

/// Samples per tick at 16 kHz.
const SAMPLES_PER_TICK: usize = 160;

/// Echo-style stub engine.
///
/// For every 5 s window of a block it emits one segment whose text reports the
/// window's RMS level, e.g. `"[stub base.en en: rms 0.132]"`.
#[derive(Debug, Default)]
pub struct StubEngine {
    instances: HashMap<u32, String>,
    next_instance: u32,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently loaded instances.
    pub fn loaded(&self) -> usize {
        self.instances.len()
    }
}

impl SpeechEngine for StubEngine {
    fn load(&mut self, model_id: &str) -> Result<InstanceId> {
        if models::lookup(model_id).is_none() {
            return Err(ScribeError::EngineLoad {
                model_id: model_id.to_string(),
                reason: "no weights for this model id".into(),
            });
        }
        let id = self.next_instance;
        self.next_instance += 1;
        self.instances.insert(id, model_id.to_string());
        debug!(model_id, instance = id, "StubEngine::load");
        Ok(InstanceId(id))
    }

    fn run(
        &mut self,
        instance: InstanceId,
        samples: &[f32],
        params: &RunParams,
    ) -> Result<Vec<RawSegment>> {
        let model_id = self
            .instances
            .get(&instance.0)
            .ok_or(ScribeError::EngineNotReady)?;

        let total_ticks = (samples.len() / SAMPLES_PER_TICK) as i64;
        let mut segments = Vec::new();
        let mut t0 = 0;
        while t0 < total_ticks {
            let t1 = (t0 + WINDOW_TICKS).min(total_ticks);
            let window = &samples[t0 as usize * SAMPLES_PER_TICK..t1 as usize * SAMPLES_PER_TICK];
            let sum_sq: f32 = window.iter().map(|s| s * s).sum();
            let rms = (sum_sq / window.len().max(1) as f32).sqrt();
            let mode = if params.translate {
                "translate"
            } else {
                params.language.as_str()
            };
            segments.push(RawSegment {
                t0,
                t1,
                text: format!(" [stub {model_id} {mode}: rms {rms:.3}]"),
            });
            t0 = t1;
        }
        Ok(segments)
    }

    fn free(&mut self, instance: InstanceId) {
        if self.instances.remove(&instance.0).is_some() {
            debug!(instance = instance.0, "StubEngine::free");
        }
    }
}
