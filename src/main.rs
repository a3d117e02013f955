use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing_subscriber::EnvFilter;

use tmatrace::catalog::MetricCatalog;
use tmatrace::cli::{Cli, OutputFormat};
use tmatrace::config::RunConfig;
use tmatrace::json_output::JsonOutput;
use tmatrace::post_process::{PostProcessReport, PostProcessor};
use tmatrace::timeline::NodeState;

/// Initialize tracing: warnings by default, -v debug, -vv trace; RUST_LOG wins if set
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn write_report(report: &PostProcessReport, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Text => write!(out, "{}", report.coverage)?,
        OutputFormat::Json => {
            JsonOutput::new(report).write_to(&mut *out)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let file_config = match &args.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("loading run configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    let config = args.apply_overrides(file_config);

    // A broken catalog is fatal before any sample is read
    let catalog = MetricCatalog::from_file(&args.catalog)
        .with_context(|| format!("loading metric catalog {}", args.catalog.display()))?;

    let node_state = args
        .nodes
        .as_ref()
        .map(|path| {
            NodeState::from_file(path)
                .with_context(|| format!("loading node state {}", path.display()))
        })
        .transpose()?;

    let processor = PostProcessor::new(config, &catalog, node_state)?;
    let report = processor
        .run(&args.logs, &args.raw_logs)
        .with_context(|| format!("processing raw logs in {}", args.logs.display()))?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            write_report(&report, args.format, &mut BufWriter::new(file))?;
        }
        None => write_report(&report, args.format, &mut io::stdout().lock())?,
    }

    Ok(())
}
