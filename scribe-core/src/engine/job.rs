//! Async job loop.
//!
//! ## Stages
//!
//! ```text
//! 1. Lock the session slot for the whole job
//! 2. Cancelled already? → Cancelled, empty transcript
//! 3. Open (or reuse) the engine session, apply per-job settings
//! 4. For each chunk, in order:
//!    a. Cancelled? → stop before submitting
//!    b. session.run(chunk) on a blocking thread
//!    c. merge_into(transcript), emit ProgressEvent
//!    d. yield to the runtime
//! 5. Completed | Cancelled | Failed → JobOutcome
//! ```
//!
//! At most one chunk is ever in flight: chunk N+1 is not submitted until
//! chunk N's `run` has returned.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    audio::NormalizedSamples,
    buffering::chunk::Chunk,
    engine::JobOptions,
    error::ScribeError,
    inference::{EngineHandle, EngineSession, SessionConfig},
    ipc::events::{EngineStateEvent, JobError, JobOutcome, JobStatus, ProgressEvent},
    transcript::{merge_into, Transcript},
};

#[derive(Default)]
pub struct JobDiagnostics {
    pub jobs_submitted: AtomicUsize,
    pub jobs_completed: AtomicUsize,
    pub jobs_cancelled: AtomicUsize,
    pub jobs_failed: AtomicUsize,
    pub chunks_submitted: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub segments_received: AtomicUsize,
    pub segments_merged: AtomicUsize,
    pub segments_discarded: AtomicUsize,
}

impl JobDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            chunks_submitted: self.chunks_submitted.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            segments_received: self.segments_received.load(Ordering::Relaxed),
            segments_merged: self.segments_merged.load(Ordering::Relaxed),
            segments_discarded: self.segments_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub jobs_submitted: usize,
    pub jobs_completed: usize,
    pub jobs_cancelled: usize,
    pub jobs_failed: usize,
    pub chunks_submitted: usize,
    pub inference_errors: usize,
    pub segments_received: usize,
    pub segments_merged: usize,
    pub segments_discarded: usize,
}

/// Everything one job needs, moved into its task as a single value.
pub struct JobContext {
    pub job_id: u64,
    pub samples: NormalizedSamples,
    pub chunks: Vec<Chunk>,
    pub options: JobOptions,
    /// Canonical id of the model the job must run on.
    pub model_id: String,
    pub memory_limit_mb: u32,
    pub engine: EngineHandle,
    pub session: Arc<AsyncMutex<Option<EngineSession>>>,
    pub state_tx: Arc<watch::Sender<EngineStateEvent>>,
    pub cancel: Arc<AtomicBool>,
    pub progress_tx: broadcast::Sender<ProgressEvent>,
    pub status_tx: watch::Sender<JobStatus>,
    pub diagnostics: Arc<JobDiagnostics>,
}

/// Run the job to a terminal status. Never panics on engine errors; they end
/// up in the returned outcome.
pub async fn run(ctx: JobContext) -> JobOutcome {
    let span = info_span!("job", job_id = ctx.job_id, chunks = ctx.chunks.len());
    run_chunks(ctx).instrument(span).await
}

async fn run_chunks(ctx: JobContext) -> JobOutcome {
    let mut slot = ctx.session.lock().await;
    let mut transcript = Transcript::new();

    if ctx.cancel.load(Ordering::SeqCst) {
        info!("job cancelled before the engine was opened");
        return finish(&ctx, JobStatus::Cancelled, transcript, None);
    }

    ctx.status_tx.send_replace(JobStatus::Running);
    info!(
        total_secs = ctx.samples.duration_secs(),
        model_id = %ctx.model_id,
        "job started"
    );

    let reusable = slot
        .as_ref()
        .is_some_and(|s| s.is_open() && s.model_id() == ctx.model_id);
    if !reusable {
        if let Some(mut old) = slot.take() {
            old.close();
        }
        let config = SessionConfig {
            model_id: ctx.model_id.clone(),
            language: ctx.options.language.clone(),
            thread_count: ctx.options.thread_count,
            translate: ctx.options.translate,
        };
        match EngineSession::open(
            ctx.engine.clone(),
            config,
            ctx.memory_limit_mb,
            Arc::clone(&ctx.state_tx),
        )
        .await
        {
            Ok(session) => *slot = Some(session),
            Err(e) => {
                error!(error = %e, "engine session failed to open");
                return finish(
                    &ctx,
                    JobStatus::Failed,
                    transcript,
                    Some(JobError::new(&e, None)),
                );
            }
        }
    }

    let Some(session) = slot.as_mut() else {
        let e = ScribeError::EngineNotReady;
        return finish(
            &ctx,
            JobStatus::Failed,
            transcript,
            Some(JobError::new(&e, None)),
        );
    };
    session.configure(
        &ctx.options.language,
        ctx.options.thread_count,
        ctx.options.translate,
    );

    let rate = ctx.samples.sample_rate();
    let total_chunks = ctx.chunks.len();
    let total_secs = ctx.samples.duration_secs();

    for chunk in &ctx.chunks {
        if ctx.cancel.load(Ordering::SeqCst) {
            info!(next_chunk = chunk.index, "job cancelled between chunks");
            return finish(&ctx, JobStatus::Cancelled, transcript, None);
        }

        ctx.diagnostics
            .chunks_submitted
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            chunk = chunk.index,
            start_secs = chunk.start_secs(rate),
            end_secs = chunk.end_secs(rate),
            "submitting chunk"
        );

        let segments = match session.run(chunk.samples(&ctx.samples).to_vec()).await {
            Ok(segments) => segments,
            Err(e) => {
                ctx.diagnostics
                    .inference_errors
                    .fetch_add(1, Ordering::Relaxed);
                error!(chunk = chunk.index, error = %e, "chunk inference failed");
                let err = JobError::new(&e, Some(chunk.index));
                return finish(&ctx, JobStatus::Failed, transcript, Some(err));
            }
        };

        let before = transcript.len();
        let stats = merge_into(
            &mut transcript,
            &segments,
            chunk.start_secs(rate),
            chunk.overlap_secs(rate),
        );
        ctx.diagnostics
            .segments_received
            .fetch_add(segments.len(), Ordering::Relaxed);
        ctx.diagnostics
            .segments_merged
            .fetch_add(stats.kept, Ordering::Relaxed);
        ctx.diagnostics
            .segments_discarded
            .fetch_add(stats.discarded, Ordering::Relaxed);

        let event = ProgressEvent {
            job_id: ctx.job_id,
            chunk_index: chunk.index,
            total_chunks,
            processed_secs: chunk.end_secs(rate),
            total_secs,
            segments: transcript.segments[before..].to_vec(),
        };
        let delivered = ctx.progress_tx.send(event).is_ok();
        debug!(
            chunk = chunk.index,
            kept = stats.kept,
            discarded = stats.discarded,
            delivered,
            "chunk merged"
        );

        tokio::task::yield_now().await;
    }

    finish(&ctx, JobStatus::Completed, transcript, None)
}

fn finish(
    ctx: &JobContext,
    status: JobStatus,
    transcript: Transcript,
    error: Option<JobError>,
) -> JobOutcome {
    let counter = match status {
        JobStatus::Completed => &ctx.diagnostics.jobs_completed,
        JobStatus::Cancelled => &ctx.diagnostics.jobs_cancelled,
        _ => &ctx.diagnostics.jobs_failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    ctx.status_tx.send_replace(status);

    let snap = ctx.diagnostics.snapshot();
    info!(
        status = ?status,
        segments = transcript.len(),
        chunks_submitted = snap.chunks_submitted,
        inference_errors = snap.inference_errors,
        segments_received = snap.segments_received,
        segments_merged = snap.segments_merged,
        segments_discarded = snap.segments_discarded,
        "job finished, diagnostics"
    );

    JobOutcome {
        job_id: ctx.job_id,
        status,
        transcript,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::chunk::plan;
    use crate::error::{ErrorKind, Result};
    use crate::inference::{InstanceId, RawSegment, RunParams, SpeechEngine};
    use parking_lot::Mutex;

    /// Engine that reports one segment per call and records what it saw.
    struct ScriptedEngine {
        calls: Arc<Mutex<Vec<usize>>>,
        fail_on_call: Option<usize>,
    }

    impl SpeechEngine for ScriptedEngine {
        fn load(&mut self, _model_id: &str) -> Result<InstanceId> {
            Ok(InstanceId(1))
        }

        fn run(
            &mut self,
            _: InstanceId,
            samples: &[f32],
            _: &RunParams,
        ) -> Result<Vec<RawSegment>> {
            let mut calls = self.calls.lock();
            let call = calls.len();
            calls.push(samples.len());
            if Some(call) == self.fail_on_call {
                return Err(ScribeError::Inference("scripted failure".into()));
            }
            Ok(vec![RawSegment {
                t0: 100,
                t1: 400,
                text: format!("chunk {call}"),
            }])
        }

        fn free(&mut self, _: InstanceId) {}
    }

    struct Harness {
        ctx: JobContext,
        calls: Arc<Mutex<Vec<usize>>>,
        progress_rx: broadcast::Receiver<ProgressEvent>,
        status_rx: watch::Receiver<JobStatus>,
    }

    fn harness(secs: usize, fail_on_call: Option<usize>) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = EngineHandle::new(ScriptedEngine {
            calls: Arc::clone(&calls),
            fail_on_call,
        });
        let samples = NormalizedSamples::new(vec![0.1; 16_000 * secs], 16_000).unwrap();
        let chunks = plan(&samples, 30.0, 5.0).unwrap();
        let (progress_tx, progress_rx) = broadcast::channel(16);
        let (status_tx, status_rx) = watch::channel(JobStatus::Planned);

        let ctx = JobContext {
            job_id: 9,
            samples,
            chunks,
            options: JobOptions::default(),
            model_id: "tiny".into(),
            memory_limit_mb: 0,
            engine,
            session: Arc::new(AsyncMutex::new(None)),
            state_tx: Arc::new(watch::channel(EngineStateEvent::unloaded()).0),
            cancel: Arc::new(AtomicBool::new(false)),
            progress_tx,
            status_tx,
            diagnostics: Arc::new(JobDiagnostics::default()),
        };
        Harness {
            ctx,
            calls,
            progress_rx,
            status_rx,
        }
    }

    #[tokio::test]
    async fn completes_all_chunks_in_order() {
        let mut h = harness(90, None);
        let diagnostics = Arc::clone(&h.ctx.diagnostics);
        let outcome = run(h.ctx).await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(*h.status_rx.borrow_and_update(), JobStatus::Completed);
        assert_eq!(h.calls.lock().len(), 4);

        let starts: Vec<f64> = outcome.transcript.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![1.0, 26.0, 51.0, 66.0]);

        for expected in 0..4 {
            let event = h.progress_rx.recv().await.unwrap();
            assert_eq!(event.chunk_index, expected);
            assert_eq!(event.total_chunks, 4);
            assert_eq!(event.segments.len(), 1);
        }
        let snap = diagnostics.snapshot();
        assert_eq!(snap.chunks_submitted, 4);
        assert_eq!(snap.jobs_completed, 1);
        assert_eq!(snap.segments_merged, 4);
    }

    #[tokio::test]
    async fn failure_keeps_earlier_chunks_and_reports_index() {
        let h = harness(100, Some(2));
        let outcome = run(h.ctx).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        let texts: Vec<&str> = outcome
            .transcript
            .segments
            .iter()
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(texts, vec!["chunk 0", "chunk 1"]);

        let err = outcome.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Inference);
        assert_eq!(err.chunk_index, Some(2));
        assert_eq!(h.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_touches_the_engine() {
        let h = harness(90, None);
        h.ctx.cancel.store(true, Ordering::SeqCst);
        let session = Arc::clone(&h.ctx.session);
        let outcome = run(h.ctx).await;

        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert!(outcome.transcript.is_empty());
        assert!(h.calls.lock().is_empty());
        assert!(session.lock().await.is_none());
    }

    #[tokio::test]
    async fn unknown_model_fails_without_chunk_index() {
        let mut h = harness(10, None);
        h.ctx.model_id = "gigantic".into();
        let outcome = run(h.ctx).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, ErrorKind::EngineLoad);
        assert_eq!(err.chunk_index, None);
    }
}
