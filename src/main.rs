mod cfg;
mod dataflow;
mod descriptor;
mod ir;
mod jdk;
mod modular;
mod multiplier;
mod opcodes;
mod pipeline;
mod scan;
mod telemetry;
#[cfg(test)]
mod test_harness;
mod transforms;
mod writer;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::info;

use crate::pipeline::{PassReport, Pipeline, default_passes};
use crate::scan::load_pool;
use crate::telemetry::{Telemetry, init_logging, with_span};
use crate::writer::save_pool;

/// CLI arguments for jdeob execution.
#[derive(Parser, Debug)]
#[command(
    name = "jdeob",
    about = "Deobfuscates the classes of a JAR archive into a functionally equivalent, readable one.",
    version
)]
struct Cli {
    /// Obfuscated `.jar` archive or single `.class` file.
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    /// Destination archive; replaced when it already exists.
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
    /// OTLP/HTTP collector endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    /// Write a JSON report of every pass to this path.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let telemetry = match cli.otel.clone() {
        Some(endpoint) => Some(Telemetry::new(endpoint)?),
        None => None,
    };
    let result = run(&cli, telemetry.as_ref());
    if let Some(telemetry) = telemetry {
        telemetry.shutdown()?;
    }
    result
}

fn run(cli: &Cli, telemetry: Option<&Telemetry>) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    if cli.input.is_dir() {
        anyhow::bail!("input is a directory: {}", cli.input.display());
    }
    if cli.output.exists() {
        fs::remove_file(&cli.output)
            .with_context(|| format!("failed to remove existing output {}", cli.output.display()))?;
    }

    let started_at = Instant::now();
    info!("Loading classes from {}.", cli.input.display());
    let mut pool = with_span(
        telemetry,
        "load",
        &[KeyValue::new("jdeob.input", cli.input.display().to_string())],
        || load_pool(&cli.input, telemetry),
    )?;
    info!("Loaded {} classes.", pool.len());

    let pipeline = Pipeline::new(&default_passes())?;
    info!("Running {} bytecode transformers.", pipeline.len());
    let passes = pipeline.run(&mut pool, telemetry)?;

    with_span(
        telemetry,
        "export",
        &[KeyValue::new("jdeob.output", cli.output.display().to_string())],
        || save_pool(&pool, &cli.output, telemetry),
    )?;
    info!("Exported {} classes to {}.", pool.len(), cli.output.display());

    if let Some(path) = &cli.report {
        let report = RunReport {
            input: cli.input.display().to_string(),
            output: cli.output.display().to_string(),
            class_count: pool.len(),
            total_ms: started_at.elapsed().as_millis(),
            passes,
        };
        write_report(path, &report)?;
    }
    Ok(())
}

/// JSON summary of one run.
#[derive(Debug, Serialize)]
struct RunReport {
    input: String,
    output: String,
    class_count: usize,
    total_ms: u128,
    passes: Vec<PassReport>,
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report).context("failed to serialize run report")?;
    writer
        .write_all(b"\n")
        .context("failed to write run report")?;
    writer.flush().context("failed to write run report")?;
    Ok(())
}
