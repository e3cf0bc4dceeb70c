//! Waveform extraction command.
//!
//! Runs one extraction on a worker thread and waits for it on the async runtime, so Ctrl-C and
//! the optional deadline can cancel the run while it decodes.

use anyhow::{anyhow, Context};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use wavext::config::{BackendKind, WavextConfig};
use wavext::decoder::AutoBackend;
use wavext::waveform::{ExtractError, Extractor, Metric, Waveform, WaveformPoint, WaveformRequest};

/// Exit code for a run cancelled by Ctrl-C or the deadline.
const EXIT_CANCELLED: u8 = 130;

/// Command-line overrides for a single extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractArgs {
    pub source: String,
    pub samples: Option<i64>,
    pub metric: Option<Metric>,
    pub output: Option<PathBuf>,
    pub decoder: Option<BackendKind>,
    pub timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct WaveformOutput<'a> {
    data: &'a [WaveformPoint],
    truncated: bool,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: String,
    code: &'a str,
}

/// Extracts a waveform and writes it as JSON to stdout or the output file.
///
/// Extraction failures are reported as JSON on stderr and turned into the exit code; only
/// configuration and I/O problems come back as errors.
///
/// # Errors
/// - If the config file cannot be loaded
/// - If the output cannot be written
pub async fn handle_extract(args: ExtractArgs) -> anyhow::Result<ExitCode> {
    let mut config = WavextConfig::load()?;
    apply_overrides(&mut config, &args);

    let request = WaveformRequest::new(
        args.source.clone(),
        config.waveform.samples,
        config.waveform.metric,
    );
    let deadline = config.limits.timeout_secs.map(Duration::from_secs);

    tracing::info!(
        "Extracting {} points ({}) from {} with the {} decoder",
        request.points,
        request.metric,
        request.source,
        config.decoder.backend
    );

    let extractor = Extractor::new(AutoBackend::new(config.decoder.clone()), config.limits());
    match run(&extractor, request, deadline).await? {
        Ok(waveform) => {
            write_output(&render_waveform(&waveform)?, args.output.as_ref())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!("Extraction failed: {}", e);
            eprintln!("{}", render_error(&e)?);
            Ok(ExitCode::from(exit_code(&e)))
        }
    }
}

/// Starts the run and waits for it, cancelling on Ctrl-C or when the deadline passes.
async fn run(
    extractor: &Extractor,
    request: WaveformRequest,
    deadline: Option<Duration>,
) -> anyhow::Result<Result<Waveform, ExtractError>> {
    let handle = match extractor.start(request) {
        Ok(handle) => handle,
        Err(e) => return Ok(Err(e)),
    };
    let cancel = handle.cancel_handle();
    let mut worker = tokio::task::spawn_blocking(move || handle.wait());

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling extraction");
            cancel.cancel();
            worker.await
        }
        _ = expire(deadline) => {
            tracing::warn!("Extraction exceeded {:?}, cancelling", deadline);
            cancel.cancel();
            worker.await
        }
    };

    joined.map_err(|e| anyhow!("Extraction task failed: {e}"))
}

async fn expire(deadline: Option<Duration>) {
    match deadline {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending().await,
    }
}

fn apply_overrides(config: &mut WavextConfig, args: &ExtractArgs) {
    if let Some(samples) = args.samples {
        config.waveform.samples = samples;
    }
    if let Some(metric) = args.metric {
        config.waveform.metric = metric;
    }
    if let Some(backend) = args.decoder {
        config.decoder.backend = backend;
    }
    if args.timeout_secs.is_some() {
        config.limits.timeout_secs = args.timeout_secs;
    }
}

fn render_waveform(waveform: &Waveform) -> anyhow::Result<String> {
    let output = WaveformOutput {
        data: &waveform.points,
        truncated: waveform.truncated,
    };
    Ok(serde_json::to_string(&output)?)
}

fn render_error(err: &ExtractError) -> anyhow::Result<String> {
    let output = ErrorOutput {
        error: err.to_string(),
        code: err.code(),
    };
    Ok(serde_json::to_string(&output)?)
}

fn exit_code(err: &ExtractError) -> u8 {
    match err {
        ExtractError::Cancelled => EXIT_CANCELLED,
        _ => 1,
    }
}

fn write_output(json: &str, output: Option<&PathBuf>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Waveform written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
            stdout.flush()?;
        }
    }
    Ok(())
}
