use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use scribe::{
    audio::wav::read_wav,
    config::{default_config_path, load_config},
    inference::models,
    AudioBuffer, EngineHandle, JobStatus, StubEngine, Transcriber,
};
use tracing::info;

#[derive(Debug, Default)]
struct Args {
    input: Option<PathBuf>,
    record_secs: Option<f64>,
    config: Option<PathBuf>,
    model: Option<String>,
    language: Option<String>,
    threads: Option<usize>,
    translate: bool,
    max_chunk: Option<f64>,
    overlap: Option<f64>,
    output: Option<PathBuf>,
}

const USAGE: &str = "Usage: scribe (--input <file.wav> | --record <secs>) [--config <file.json>] \\
  [--model <id>] [--language <code>] [--threads <n>] [--translate] \\
  [--max-chunk <secs>] [--overlap <secs>] [--output <file.json>]";

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);

    fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
        it.next()
            .with_context(|| format!("missing value for {flag}"))
    }

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--input" | "-i" => args.input = Some(PathBuf::from(value(&mut it, &arg)?)),
            "--record" => {
                args.record_secs = Some(
                    value(&mut it, &arg)?
                        .parse()
                        .context("invalid value for --record")?,
                )
            }
            "--config" => args.config = Some(PathBuf::from(value(&mut it, &arg)?)),
            "--model" | "-m" => args.model = Some(value(&mut it, &arg)?),
            "--language" | "-l" => args.language = Some(value(&mut it, &arg)?),
            "--threads" | "-t" => {
                args.threads = Some(
                    value(&mut it, &arg)?
                        .parse()
                        .context("invalid value for --threads")?,
                )
            }
            "--translate" => args.translate = true,
            "--max-chunk" => {
                args.max_chunk = Some(
                    value(&mut it, &arg)?
                        .parse()
                        .context("invalid value for --max-chunk")?,
                )
            }
            "--overlap" => {
                args.overlap = Some(
                    value(&mut it, &arg)?
                        .parse()
                        .context("invalid value for --overlap")?,
                )
            }
            "--output" | "-o" => args.output = Some(PathBuf::from(value(&mut it, &arg)?)),
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}\n{USAGE}"),
        }
    }

    if args.input.is_none() == args.record_secs.is_none() {
        bail!("exactly one of --input or --record is required\n{USAGE}");
    }
    Ok(args)
}

#[cfg(feature = "audio-cpal")]
fn record(secs: f64, device: Option<&str>) -> anyhow::Result<AudioBuffer> {
    let recorder = scribe::Recorder::start(device, secs)?;
    info!(
        sample_rate = recorder.sample_rate(),
        channels = recorder.channel_count(),
        secs,
        "recording"
    );
    std::thread::sleep(std::time::Duration::from_secs_f64(secs.max(0.0)));
    info!(captured_secs = recorder.recorded_secs(), "recording stopped");
    Ok(recorder.stop()?)
}

#[cfg(not(feature = "audio-cpal"))]
fn record(_secs: f64, _device: Option<&str>) -> anyhow::Result<AudioBuffer> {
    bail!("--record requires the 'audio-cpal' feature")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scribe=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("scribe failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = parse_args()?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    config.apply_env_overrides();
    if let Some(model) = &args.model {
        config.model_id = model.clone();
    }
    config.normalize();

    let buffer = match (&args.input, args.record_secs) {
        (Some(path), _) => read_wav(path).with_context(|| format!("decoding {}", path.display()))?,
        (None, Some(secs)) => record(secs, config.preferred_input_device.as_deref())?,
        (None, None) => bail!("no audio source"),
    };
    info!(
        channels = buffer.channel_count(),
        sample_rate = buffer.sample_rate(),
        secs = buffer.duration_secs(),
        "audio loaded"
    );

    if let Some(model) = models::lookup(&config.model_id) {
        info!(
            model = model.label,
            disk_mb = model.disk_mb,
            memory_mb = model.memory_mb,
            english_only = model.english_only,
            "model selected"
        );
    }

    let transcriber = Transcriber::new(config, EngineHandle::new(StubEngine::new()));
    let mut options = transcriber.job_options();
    if let Some(language) = args.language {
        options.language = language;
    }
    if let Some(threads) = args.threads {
        options.thread_count = threads;
    }
    if let Some(max_chunk) = args.max_chunk {
        options.max_chunk_seconds = max_chunk;
    }
    if let Some(overlap) = args.overlap {
        options.overlap_seconds = overlap;
    }
    options.translate |= args.translate;

    let handle = Arc::new(transcriber.submit_job(buffer, options).await?);

    let progress = handle.on_progress(|event| {
        eprintln!(
            "[{}/{}] {:.1}s / {:.1}s  +{} segment(s)",
            event.chunk_index + 1,
            event.total_chunks,
            event.processed_secs,
            event.total_secs,
            event.segments.len()
        );
    });

    let cancel_on_ctrl_c = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
        })
    };

    let outcome = handle.wait().await;
    cancel_on_ctrl_c.abort();
    let _ = progress.await;

    let json = serde_json::to_string_pretty(&outcome)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }

    let snap = transcriber.diagnostics_snapshot();
    info!(
        status = ?outcome.status,
        chunks_submitted = snap.chunks_submitted,
        segments_merged = snap.segments_merged,
        segments_discarded = snap.segments_discarded,
        "done"
    );

    if outcome.status == JobStatus::Failed {
        bail!(
            "transcription failed: {}",
            outcome.error.map(|e| e.message).unwrap_or_default()
        );
    }
    Ok(())
}
