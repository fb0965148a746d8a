//! pdm-engine - predictive maintenance decision engine
//!
//! Offline calibration and online scoring against a deployed artifact
//! directory.
//!
//! # Usage
//!
//! ```bash
//! # Calibrate thresholds from detector scores and write meta.json
//! pdm-engine calibrate --inputs scores.json --out artifacts/
//!
//! # Score a batch of records (JSON array of objects)
//! pdm-engine predict --records history.json
//!
//! # Continuous monitoring: one JSON record per stdin line
//! tail -f telemetry.jsonl | pdm-engine monitor --stream-key asset_id
//!
//! # Readiness check (exit code 1 when not operational)
//! pdm-engine health
//! ```
//!
//! # Environment Variables
//!
//! - `PDM_CONFIG`: Path to the engine config TOML
//! - `PDM_ARTIFACT_DIR`: Artifact directory (overrides `[artifacts] dir`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use pdm_engine::calibration::{calibrate, CalibrationInputs};
use pdm_engine::config::EngineConfig;
use pdm_engine::serving::{ServingContext, StreamRegistry};
use pdm_engine::types::FeatureRecord;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "pdm-engine")]
#[command(about = "Predictive maintenance anomaly scoring, calibration and alerting")]
#[command(version)]
struct CliArgs {
    /// Engine config TOML (default search: $PDM_CONFIG, ./pdm_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Artifact directory, overriding the config file
    #[arg(long, global = true, env = "PDM_ARTIFACT_DIR")]
    artifacts: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate thresholds from detector scores and persist meta.json
    Calibrate {
        /// JSON file with reference/validation scores and validation labels
        #[arg(long)]
        inputs: PathBuf,
        /// Output directory (default: the artifact directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Score every full window of a record history
    Predict {
        /// JSON array of records, or `-` for stdin
        #[arg(long)]
        records: PathBuf,
        /// Keep only the trailing N records (default: [serving] limit_rows)
        #[arg(long)]
        limit_rows: Option<usize>,
        /// Skip K-of-M smoothed labels
        #[arg(long)]
        no_smooth: bool,
    },

    /// Score only the most recent record of a history
    Latest {
        /// JSON array of records, or `-` for stdin
        #[arg(long)]
        records: PathBuf,
        #[arg(long)]
        limit_rows: Option<usize>,
    },

    /// Stream JSON records from stdin (one per line) and emit one decision per line
    Monitor {
        /// Record field naming the stream; records without it share one stream
        #[arg(long, default_value = "stream_id")]
        stream_key: String,
    },

    /// Print the readiness report; exits non-zero when not operational
    Health,

    /// Print the deployed feature order and model version
    Features,
}

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Logs go to stderr; stdout carries command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load_from_file(p).with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(EngineConfig::load()),
    }
}

fn read_records(path: &Path) -> Result<Vec<FeatureRecord>> {
    let records: Vec<FeatureRecord> = if path == Path::new("-") {
        serde_json::from_reader(std::io::stdin().lock()).context("Invalid records on stdin")?
    } else {
        let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Invalid records in {}", path.display()))?
    };
    Ok(records)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).context("Failed to write output")?;
    writeln!(out)?;
    Ok(())
}

fn load_context(dir: &Path) -> Result<ServingContext> {
    ServingContext::load(dir).with_context(|| format!("Failed to load artifacts from {}", dir.display()))
}

/// Split one stdin line into its stream id and feature record.
fn parse_stream_line(line: &str, stream_key: &str) -> Result<(String, FeatureRecord)> {
    let mut object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(line).context("Expected a JSON object per line")?;
    let stream = match object.remove(stream_key) {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => "default".to_string(),
    };
    let record = object
        .into_iter()
        .map(|(name, value)| (name, value.as_f64()))
        .collect();
    Ok((stream, record))
}

#[derive(Serialize)]
struct StreamLine<'a, T: Serialize> {
    stream: &'a str,
    #[serde(flatten)]
    update: T,
}

fn run_monitor(ctx: &ServingContext, stream_key: &str) -> Result<()> {
    let mut registry = StreamRegistry::new();
    let mut out = std::io::stdout().lock();
    for (n, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let (stream, record) = match parse_stream_line(&line, stream_key) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = n + 1, error = %e, "Skipping malformed record");
                continue;
            }
        };
        match registry.observe(ctx, &stream, &record) {
            Ok(update) => {
                serde_json::to_writer(&mut out, &StreamLine { stream: &stream, update })?;
                writeln!(out)?;
                out.flush()?;
            }
            Err(e) => warn!(line = n + 1, stream = %stream, error = %e, "Record rejected"),
        }
    }
    info!(streams = registry.len(), "Input closed");
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = load_config(args.config.as_deref())?;
    let artifact_dir = args.artifacts.clone().unwrap_or_else(|| config.artifacts.dir.clone());

    match args.command {
        Command::Calibrate { inputs, out } => {
            let settings = config.calibration_settings().context("Invalid calibration settings")?;
            let inputs = CalibrationInputs::load(&inputs)
                .with_context(|| format!("Failed to load calibration inputs {}", inputs.display()))?;
            let outcome = calibrate(&inputs, &settings).context("Calibration failed")?;
            let out = out.unwrap_or(artifact_dir);
            std::fs::create_dir_all(&out).with_context(|| format!("Failed to create {}", out.display()))?;
            let path = outcome.persist(&out).context("Failed to persist calibration artifacts")?;
            info!(
                path = %path.display(),
                operate_thr = outcome.meta.operate_thr,
                fallbacks = outcome.meta.threshold_fallbacks.len(),
                "Calibration complete"
            );
            print_json(&outcome.meta)?;
        }
        Command::Predict {
            records,
            limit_rows,
            no_smooth,
        } => {
            let ctx = load_context(&artifact_dir)?;
            let records = read_records(&records)?;
            let limit = limit_rows.unwrap_or(config.serving.limit_rows);
            let smooth = config.serving.smooth_batches && !no_smooth;
            let batch = ctx.predict_records(&records, Some(limit), smooth).context("Prediction failed")?;
            print_json(&batch)?;
        }
        Command::Latest { records, limit_rows } => {
            let ctx = load_context(&artifact_dir)?;
            let records = read_records(&records)?;
            let limit = limit_rows.unwrap_or(config.serving.limit_rows);
            let latest = ctx.predict_latest_records(&records, Some(limit)).context("Prediction failed")?;
            print_json(&latest)?;
        }
        Command::Monitor { stream_key } => {
            let ctx = load_context(&artifact_dir)?;
            run_monitor(&ctx, &stream_key)?;
        }
        Command::Health => {
            let ctx = load_context(&artifact_dir)?;
            let report = ctx.health();
            print_json(report)?;
            if !report.operational {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Features => {
            let ctx = load_context(&artifact_dir)?;
            print_json(&ctx.features())?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
