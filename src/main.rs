//! `dialog-tts` command-line entry point.
//!
//! ```text
//! dialog-tts --config conversation.yaml --output-dir out/
//! ```
//!
//! Exits 0 when at least one utterance was stitched, even if others were
//! skipped; any fatal error exits non-zero.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dialog_tts::config::Config;
use dialog_tts::engines::f5::F5CommandEngine;
use dialog_tts::input;
use dialog_tts::pipeline::Pipeline;

/// Synthesize a tagged script or dialog table into one speech file.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the YAML run configuration.
    #[arg(long)]
    config: PathBuf,

    /// Directory that receives the stitched output.
    #[arg(long, visible_alias = "output_dir")]
    output_dir: PathBuf,

    /// Override the output file (default: `<output-dir>/<output.file_name>`).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log per-call details.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let utterances = input::load_utterances(&config.dataset).context("reading input")?;

    let mut engine = F5CommandEngine::from_config(&config)?;
    let mut pipeline = Pipeline::from_config(&config, &args.output_dir)?;
    if let Some(output) = args.output {
        pipeline = pipeline.with_output(output);
    }

    log::info!("Beginning conversation audio generation...");
    let summary = pipeline
        .run(&mut engine, &utterances)
        .context("conversation audio generation failed")?;

    println!("{summary}");
    for (index, reason) in &summary.failures {
        println!("  skipped line {}: {reason}", index + 1);
    }
    Ok(())
}
