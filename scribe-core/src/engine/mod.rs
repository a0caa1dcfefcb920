//! `Transcriber`: top-level orchestrator.
//!
//! ## Lifecycle
//!
//! ```text
//! Transcriber::new()
//!     └─► load_model()         → optional; otherwise the first job opens the engine
//!         └─► submit_job()     → normalize + plan, job task spawned, JobHandle returned
//!             ├─► on_progress / subscribe_progress
//!             ├─► cancel_job() → stops before the next chunk
//!             └─► wait / on_complete → JobOutcome
//! ```
//!
//! Only one job (or model switch) runs at a time. A second `submit_job` while
//! one is active fails with `JobInProgress` and leaves the active job alone.
//!
//! Normalization and chunk planning run on the blocking pool before
//! `submit_job` resolves, so format and chunk-configuration errors are
//! returned before any engine resource is touched and the caller's task is
//! never stalled by resampling.

pub mod job;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    audio::{self, AudioBuffer, NormalizedSamples},
    buffering::chunk::{self, Chunk},
    config::ScribeConfig,
    error::{ErrorKind, Result, ScribeError},
    inference::{models, EngineHandle, EngineSession, SessionConfig},
    ipc::events::{EngineState, EngineStateEvent, JobError, JobOutcome, JobStatus, ProgressEvent},
    transcript::Transcript,
};

/// Progress events kept for receivers that subscribe late or read slowly.
const MIN_PROGRESS_CAP: usize = 16;

/// Per-job decoding and chunking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct JobOptions {
    pub language: String,
    pub thread_count: usize,
    pub translate: bool,
    pub max_chunk_seconds: f64,
    pub overlap_seconds: f64,
}

impl JobOptions {
    pub fn from_config(config: &ScribeConfig) -> Self {
        Self {
            language: config.language.clone(),
            thread_count: config.thread_count,
            translate: config.translate,
            max_chunk_seconds: config.max_chunk_seconds,
            overlap_seconds: config.overlap_seconds,
        }
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::from_config(&ScribeConfig::default())
    }
}

/// Holds the single-flight flag for as long as it lives.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScribeError::JobInProgress)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The orchestrator handle.
///
/// `Transcriber` is `Send + Sync`; wrap it in `Arc` to share it between tasks.
pub struct Transcriber {
    config: ScribeConfig,
    engine: EngineHandle,
    /// Canonical id of the model jobs run on.
    model_id: Mutex<String>,
    session: Arc<AsyncMutex<Option<EngineSession>>>,
    /// `true` while a job or model switch is active.
    busy: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<EngineStateEvent>>,
    next_job_id: AtomicU64,
    diagnostics: Arc<job::JobDiagnostics>,
}

impl Transcriber {
    /// Create an orchestrator. No model is loaded until `load_model()` or the
    /// first job.
    pub fn new(mut config: ScribeConfig, engine: EngineHandle) -> Self {
        config.normalize();
        let (state_tx, _) = watch::channel(EngineStateEvent::unloaded());
        Self {
            model_id: Mutex::new(config.model_id.clone()),
            config,
            engine,
            session: Arc::new(AsyncMutex::new(None)),
            busy: Arc::new(AtomicBool::new(false)),
            state_tx: Arc::new(state_tx),
            next_job_id: AtomicU64::new(1),
            diagnostics: Arc::new(job::JobDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &ScribeConfig {
        &self.config
    }

    /// Job options built from the configuration defaults.
    pub fn job_options(&self) -> JobOptions {
        JobOptions::from_config(&self.config)
    }

    pub fn model_id(&self) -> String {
        self.model_id.lock().clone()
    }

    /// Switch to `model_id`, closing any open session first.
    ///
    /// # Errors
    /// - `JobInProgress` while a job is active.
    /// - `EngineLoad` if the model cannot be loaded; no session is open afterwards.
    pub async fn load_model(&self, model_id: &str) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let model_id = models::normalize_model_id(model_id);

        let mut slot = self.session.lock().await;
        if let Some(mut old) = slot.take() {
            old.close();
        }

        let config = SessionConfig {
            model_id: model_id.clone(),
            language: self.config.language.clone(),
            thread_count: self.config.thread_count,
            translate: self.config.translate,
        };
        let session = EngineSession::open(
            self.engine.clone(),
            config,
            self.config.memory_limit_mb,
            Arc::clone(&self.state_tx),
        )
        .await?;

        *slot = Some(session);
        *self.model_id.lock() = model_id;
        Ok(())
    }

    /// Close the open session, if any.
    ///
    /// # Errors
    /// `JobInProgress` while a job is active.
    pub async fn unload(&self) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        if let Some(mut session) = self.session.lock().await.take() {
            session.close();
        }
        Ok(())
    }

    /// Normalize and plan `buffer`, then start transcribing it in the background.
    ///
    /// Must be called from within a Tokio runtime. Mixing, resampling and
    /// planning run on the blocking pool; the returned future only waits on them.
    ///
    /// # Errors
    /// - `JobInProgress` if another job or model switch is active.
    /// - `UnsupportedFormat` / `InvalidChunkConfig` from the pre-flight stages.
    pub async fn submit_job(&self, buffer: AudioBuffer, options: JobOptions) -> Result<JobHandle> {
        let busy = BusyGuard::acquire(&self.busy)?;
        let runtime = Handle::try_current()
            .map_err(|e| ScribeError::Other(anyhow::anyhow!("no tokio runtime: {e}")))?;

        let target_rate = self.config.target_sample_rate;
        let max_secs = self.config.max_audio_seconds;
        let (max_chunk, overlap) = (options.max_chunk_seconds, options.overlap_seconds);
        let (samples, chunks) = tokio::task::spawn_blocking(move || {
            prepare(&buffer, target_rate, max_secs, max_chunk, overlap)
        })
        .await
        .map_err(|e| ScribeError::Other(anyhow::anyhow!("pre-flight task failed: {e}")))??;

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (progress_tx, progress_rx) = broadcast::channel(chunks.len().max(MIN_PROGRESS_CAP));
        let (status_tx, status_rx) = watch::channel(JobStatus::Planned);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = Arc::new(AtomicBool::new(false));

        info!(
            job_id,
            chunks = chunks.len(),
            secs = samples.duration_secs(),
            "job submitted"
        );
        self.diagnostics
            .jobs_submitted
            .fetch_add(1, Ordering::Relaxed);

        let ctx = job::JobContext {
            job_id,
            samples,
            chunks,
            options,
            model_id: self.model_id(),
            memory_limit_mb: self.config.memory_limit_mb,
            engine: self.engine.clone(),
            session: Arc::clone(&self.session),
            state_tx: Arc::clone(&self.state_tx),
            cancel: Arc::clone(&cancel),
            progress_tx,
            status_tx,
            diagnostics: Arc::clone(&self.diagnostics),
        };

        runtime.spawn(async move {
            let outcome = job::run(ctx).await;
            // Release the flag before publishing so a waiter can resubmit at once.
            drop(busy);
            outcome_tx.send_replace(Some(outcome));
        });

        Ok(JobHandle {
            id: job_id,
            cancel,
            status_rx,
            outcome_rx,
            progress_template: progress_rx.resubscribe(),
            first_progress: Mutex::new(Some(progress_rx)),
            runtime,
        })
    }

    /// Request cooperative cancellation of `handle`'s job.
    pub fn cancel_job(&self, handle: &JobHandle) {
        handle.cancel();
    }

    /// `true` while a job or model switch is active.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn engine_state(&self) -> EngineState {
        self.state_tx.borrow().state
    }

    /// Watch engine readiness transitions.
    pub fn subscribe_engine_state(&self) -> watch::Receiver<EngineStateEvent> {
        self.state_tx.subscribe()
    }

    /// Snapshot of job counters for observability.
    pub fn diagnostics_snapshot(&self) -> job::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

/// Pre-flight stages of a job: normalize, cap the length, plan chunks.
fn prepare(
    buffer: &AudioBuffer,
    target_rate: u32,
    max_secs: f64,
    max_chunk_secs: f64,
    overlap_secs: f64,
) -> Result<(NormalizedSamples, Vec<Chunk>)> {
    let mut samples = audio::normalize(buffer, target_rate)?;
    if max_secs > 0.0 && samples.truncate_secs(max_secs) {
        warn!(
            input_secs = buffer.duration_secs(),
            max_secs, "audio longer than maxAudioSeconds, truncating"
        );
    }
    let chunks = chunk::plan(&samples, max_chunk_secs, overlap_secs)?;
    Ok((samples, chunks))
}

/// Caller's view of one submitted job.
pub struct JobHandle {
    id: u64,
    cancel: Arc<AtomicBool>,
    status_rx: watch::Receiver<JobStatus>,
    outcome_rx: watch::Receiver<Option<JobOutcome>>,
    /// Never read; only used to mint receivers for later subscribers.
    progress_template: broadcast::Receiver<ProgressEvent>,
    /// Receiver created with the job, so it holds every event.
    first_progress: Mutex<Option<broadcast::Receiver<ProgressEvent>>>,
    runtime: Handle,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.status_rx.borrow()
    }

    /// Stop before the next chunk. The chunk already running is still merged.
    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            info!(job_id = self.id, "cancellation requested");
        }
    }

    /// Receive progress events.
    ///
    /// The first subscriber sees every event from the start of the job; later
    /// subscribers see events emitted after they subscribe. The channel closes
    /// when the job ends.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.first_progress
            .lock()
            .take()
            .unwrap_or_else(|| self.progress_template.resubscribe())
    }

    /// Call `callback` for each progress event on a runtime task.
    pub fn on_progress<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        let mut rx = self.subscribe_progress();
        let job_id = self.id;
        self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(job_id, skipped, "progress callback lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Call `callback` once with the outcome when the job ends.
    pub fn on_complete<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        let rx = self.outcome_rx.clone();
        let job_id = self.id;
        self.runtime.spawn(async move {
            callback(wait_outcome(rx, job_id).await);
        })
    }

    /// Wait for the job to reach a terminal status.
    pub async fn wait(&self) -> JobOutcome {
        wait_outcome(self.outcome_rx.clone(), self.id).await
    }
}

async fn wait_outcome(mut rx: watch::Receiver<Option<JobOutcome>>, job_id: u64) -> JobOutcome {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value).clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| JobOutcome {
        job_id,
        status: JobStatus::Failed,
        transcript: Transcript::new(),
        error: Some(JobError {
            kind: ErrorKind::Internal,
            chunk_index: None,
            message: "job task ended without an outcome".into(),
        }),
    })
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
