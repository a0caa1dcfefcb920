//! `EngineSession`: one loaded model instance and its decoding settings.
//!
//! ## Readiness
//!
//! ```text
//! Unloaded ──open()──► Loading ──load ok──► Ready ──close()──► Unloaded
//!                         └──────load err──► LoadFailed
//! ```
//!
//! Every transition is published on the shared `watch` channel so hosts can
//! show model status without polling.
//!
//! Engine calls are synchronous and may take seconds, so both `load` and `run`
//! execute inside `tokio::task::spawn_blocking`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    audio::ENGINE_SAMPLE_RATE,
    error::{Result, ScribeError},
    inference::{models, EngineHandle, InstanceId, RawSegment, RunParams},
    ipc::events::{EngineState, EngineStateEvent},
    transcript::Segment,
};

/// Engine ticks per second (one tick = 10 ms).
const TICKS_PER_SEC: f64 = 100.0;

/// Settings a session is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub model_id: String,
    /// ISO-639-1 code or `"auto"`.
    pub language: String,
    pub thread_count: usize,
    pub translate: bool,
}

impl SessionConfig {
    /// Canonicalise ids, enforce the catalog and memory ceiling, coerce
    /// English-only models and clamp the thread count.
    fn resolve(mut self, memory_limit_mb: u32) -> Result<Self> {
        self.model_id = models::normalize_model_id(&self.model_id);
        self.language = models::normalize_language(&self.language);

        let info = models::lookup(&self.model_id).ok_or_else(|| ScribeError::EngineLoad {
            model_id: self.model_id.clone(),
            reason: "unknown model id".into(),
        })?;

        if memory_limit_mb > 0 && info.memory_mb > memory_limit_mb {
            return Err(ScribeError::EngineLoad {
                model_id: self.model_id.clone(),
                reason: format!(
                    "needs about {} MB, memory limit is {} MB",
                    info.memory_mb, memory_limit_mb
                ),
            });
        }

        self.apply_model_constraints(info.english_only);
        self.thread_count = clamp_threads(self.thread_count);
        Ok(self)
    }

    fn apply_model_constraints(&mut self, english_only: bool) {
        if english_only && (self.language != "en" || self.translate) {
            warn!(
                model_id = %self.model_id,
                language = %self.language,
                translate = self.translate,
                "english-only model: forcing language=en, translate=false"
            );
            self.language = "en".into();
            self.translate = false;
        }
    }

    fn run_params(&self) -> RunParams {
        RunParams {
            language: self.language.clone(),
            thread_count: self.thread_count,
            translate: self.translate,
        }
    }
}

/// Clamp a requested worker-thread count to `[1, available_parallelism]`.
pub fn clamp_threads(requested: usize) -> usize {
    let hw = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let clamped = requested.clamp(1, hw);
    if clamped != requested {
        warn!(
            requested,
            clamped,
            hw,
            "thread count out of range, clamping"
        );
    }
    clamped
}

/// Exclusive owner of one loaded engine instance.
///
/// Dropping the session frees the instance.
pub struct EngineSession {
    engine: EngineHandle,
    instance: Option<InstanceId>,
    config: SessionConfig,
    state_tx: Arc<watch::Sender<EngineStateEvent>>,
}

impl EngineSession {
    /// Validate `config` and load the model on a blocking thread.
    ///
    /// # Errors
    /// `EngineLoad` for unknown ids, models above `memory_limit_mb` (0 means
    /// no limit) and engine initialisation failures. The state channel ends in
    /// `LoadFailed` in every error case.
    pub async fn open(
        engine: EngineHandle,
        config: SessionConfig,
        memory_limit_mb: u32,
        state_tx: Arc<watch::Sender<EngineStateEvent>>,
    ) -> Result<Self> {
        let requested_id = config.model_id.clone();
        let config = match config.resolve(memory_limit_mb) {
            Ok(c) => c,
            Err(e) => {
                publish(
                    &state_tx,
                    EngineState::LoadFailed,
                    Some(&requested_id),
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        publish(
            &state_tx,
            EngineState::Loading,
            Some(&config.model_id),
            None,
        );
        info!(
            model_id = %config.model_id,
            language = %config.language,
            threads = config.thread_count,
            translate = config.translate,
            "loading model"
        );

        let handle = engine.clone();
        let model_id = config.model_id.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            let mut engine = handle.0.lock();
            engine.load(&model_id)
        })
        .await
        .map_err(|e| ScribeError::EngineLoad {
            model_id: config.model_id.clone(),
            reason: format!("load task failed: {e}"),
        })
        .and_then(|r| r)
        .map_err(|e| match e {
            ScribeError::EngineLoad { .. } => e,
            other => ScribeError::EngineLoad {
                model_id: config.model_id.clone(),
                reason: other.to_string(),
            },
        });

        match loaded {
            Ok(instance) => {
                publish(&state_tx, EngineState::Ready, Some(&config.model_id), None);
                info!(model_id = %config.model_id, instance = instance.0, "model ready");
                Ok(Self {
                    engine,
                    instance: Some(instance),
                    config,
                    state_tx,
                })
            }
            Err(e) => {
                publish(
                    &state_tx,
                    EngineState::LoadFailed,
                    Some(&config.model_id),
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Change decoding settings without reloading the model.
    pub fn configure(&mut self, language: &str, thread_count: usize, translate: bool) {
        self.config.language = models::normalize_language(language);
        self.config.thread_count = clamp_threads(thread_count);
        self.config.translate = translate;
        let english_only = models::lookup(&self.config.model_id).is_some_and(|m| m.english_only);
        self.config.apply_model_constraints(english_only);
    }

    /// Run the model over one block of 16 kHz mono samples.
    ///
    /// Returned segments are chunk-local, clamped to the block duration,
    /// trimmed, non-empty and ordered by start.
    ///
    /// # Errors
    /// `EngineNotReady` after `close()`, `Inference` for any engine failure.
    pub async fn run(&self, samples: Vec<f32>) -> Result<Vec<Segment>> {
        let instance = self.instance.ok_or(ScribeError::EngineNotReady)?;
        let duration_secs = samples.len() as f64 / f64::from(ENGINE_SAMPLE_RATE);
        let params = self.config.run_params();
        let engine = self.engine.clone();

        let raw = tokio::task::spawn_blocking(move || {
            let mut engine = engine.0.lock();
            engine.run(instance, &samples, &params)
        })
        .await
        .map_err(|e| ScribeError::Inference(format!("inference task failed: {e}")))?
        .map_err(|e| match e {
            ScribeError::EngineNotReady | ScribeError::Inference(_) => e,
            other => ScribeError::Inference(other.to_string()),
        })?;

        debug!(
            raw_segments = raw.len(),
            duration_secs,
            "engine run finished"
        );
        Ok(to_segments(raw, duration_secs))
    }

    /// Free the engine instance. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.engine.0.lock().free(instance);
            publish(&self.state_tx, EngineState::Unloaded, None, None);
            info!(model_id = %self.config.model_id, "model unloaded");
        }
    }

    pub fn is_open(&self) -> bool {
        self.instance.is_some()
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("instance", &self.instance)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn publish(
    tx: &watch::Sender<EngineStateEvent>,
    state: EngineState,
    model_id: Option<&str>,
    detail: Option<String>,
) {
    tx.send_replace(EngineStateEvent {
        state,
        model_id: model_id.map(str::to_string),
        detail,
    });
}

/// Convert engine ticks to clamped, trimmed, ordered segments.
fn to_segments(raw: Vec<RawSegment>, duration_secs: f64) -> Vec<Segment> {
    let mut segments: Vec<Segment> = raw
        .into_iter()
        .filter_map(|r| {
            let text = r.text.trim();
            if text.is_empty() {
                return None;
            }
            let start = (r.t0 as f64 / TICKS_PER_SEC).clamp(0.0, duration_secs);
            let end = (r.t1 as f64 / TICKS_PER_SEC).clamp(start, duration_secs);
            Some(Segment::new(start, end, text))
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{SpeechEngine, StubEngine};
    use approx::assert_relative_eq;

    fn channel() -> Arc<watch::Sender<EngineStateEvent>> {
        Arc::new(watch::channel(EngineStateEvent::unloaded()).0)
    }

    fn config(model_id: &str) -> SessionConfig {
        SessionConfig {
            model_id: model_id.into(),
            language: "en".into(),
            thread_count: 1,
            translate: false,
        }
    }

    #[test]
    fn ticks_become_clamped_sorted_seconds() {
        let raw = vec![
            RawSegment {
                t0: 250,
                t1: 900,
                text: " second ".into(),
            },
            RawSegment {
                t0: 0,
                t1: 200,
                text: "first".into(),
            },
            RawSegment {
                t0: 300,
                t1: 400,
                text: "   ".into(),
            },
        ];
        let segments = to_segments(raw, 5.0);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "first");
        assert_relative_eq!(segments[0].end, 2.0);
        assert_eq!(segments[1].text, "second");
        assert_relative_eq!(segments[1].start, 2.5);
        assert_relative_eq!(segments[1].end, 5.0);
    }

    #[test]
    fn english_only_model_coerces_language_and_translate() {
        let resolved = SessionConfig {
            language: "German".into(),
            translate: true,
            ..config("tiny-en")
        }
        .resolve(0)
        .unwrap();

        assert_eq!(resolved.model_id, "tiny.en");
        assert_eq!(resolved.language, "en");
        assert!(!resolved.translate);
    }

    #[test]
    fn zero_threads_clamp_to_one() {
        assert_eq!(clamp_threads(0), 1);
        assert_eq!(clamp_threads(usize::MAX), clamp_threads(usize::MAX - 1));
    }

    #[tokio::test]
    async fn open_publishes_ready_and_close_publishes_unloaded() {
        let tx = channel();
        let mut rx = tx.subscribe();
        let mut session = EngineSession::open(
            EngineHandle::new(StubEngine::new()),
            config("base.en"),
            2048,
            Arc::clone(&tx),
        )
        .await
        .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, EngineState::Ready);
        assert_eq!(session.model_id(), "base.en");

        session.close();
        session.close();
        assert_eq!(tx.borrow().state, EngineState::Unloaded);
        assert!(matches!(
            session.run(vec![0.0; 1_600]).await,
            Err(ScribeError::EngineNotReady)
        ));
    }

    #[tokio::test]
    async fn memory_ceiling_rejects_large_models() {
        let tx = channel();
        let err = EngineSession::open(
            EngineHandle::new(StubEngine::new()),
            config("large-v3"),
            2048,
            Arc::clone(&tx),
        )
        .await
        .unwrap_err();

        assert!(
            matches!(err, ScribeError::EngineLoad { ref model_id, .. } if model_id == "large-v3")
        );
        assert_eq!(tx.borrow().state, EngineState::LoadFailed);
    }

    #[tokio::test]
    async fn unknown_model_fails_to_load() {
        let tx = channel();
        let result = EngineSession::open(
            EngineHandle::new(StubEngine::new()),
            config("gigantic"),
            0,
            tx,
        )
        .await;
        assert!(matches!(result, Err(ScribeError::EngineLoad { .. })));
    }

    struct FailingEngine;

    impl SpeechEngine for FailingEngine {
        fn load(&mut self, _model_id: &str) -> Result<InstanceId> {
            Ok(InstanceId(7))
        }

        fn run(&mut self, _: InstanceId, _: &[f32], _: &RunParams) -> Result<Vec<RawSegment>> {
            Err(ScribeError::Other(anyhow::anyhow!("decoder exploded")))
        }

        fn free(&mut self, _: InstanceId) {}
    }

    #[tokio::test]
    async fn engine_errors_surface_as_inference() {
        let session = EngineSession::open(
            EngineHandle::new(FailingEngine),
            config("tiny"),
            0,
            channel(),
        )
        .await
        .unwrap();
        let err = session.run(vec![0.0; 160]).await.unwrap_err();
        assert!(matches!(err, ScribeError::Inference(ref m) if m.contains("decoder exploded")));
    }

    #[tokio::test]
    async fn stub_run_returns_chunk_local_segments() {
        let mut session = EngineSession::open(
            EngineHandle::new(StubEngine::new()),
            config("tiny"),
            0,
            channel(),
        )
        .await
        .unwrap();
        session.configure("fr", 2, false);
        assert_eq!(session.config().language, "fr");

        let segments = session.run(vec![0.25; 16_000 * 7]).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_relative_eq!(segments[1].start, 5.0);
        assert_relative_eq!(segments[1].end, 7.0);
        assert!(segments[0].text.contains("fr"));
    }
}
