//! Run subcommand - infer author genders for one papers file

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use genderline_core::{Limits, SharedProgress, ShutdownFlag, install_signal_handlers};
use genderline_infer::{ChatClient, Pipeline, default_output_path};

use crate::config::{Config, LimitsConfig};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Model name passed to the backend (e.g. llama3.1:8b, gpt-4o-mini)
    #[arg(short, long)]
    pub model: String,

    /// Tab-separated papers file
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Resume: skip authors already in the output file
    #[arg(long = "continue")]
    pub resume: bool,

    /// Backend: local-model or hosted-chat
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Output file (default: {output-dir}/{input}_gender_authors_{model}.tsv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for the default output file
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of input rows to read
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,

    /// Inference calls in flight at once [env: NUM_PARALLEL]
    #[arg(long)]
    pub num_parallel: Option<usize>,

    /// Model contexts resident at once [env: MAX_LOADED_MODELS]
    #[arg(long)]
    pub max_loaded_models: Option<usize>,

    /// Result queue capacity [env: MAX_QUEUE]
    #[arg(long)]
    pub max_queue: Option<usize>,
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let limits = resolve_limits(&args, &config.limits, |var| std::env::var(var).ok())?;
    let settings = config.backend.settings(args.backend.as_deref())?;

    let input = args.data.unwrap_or_else(|| config.input.data.clone());
    let output = match args.output {
        Some(path) => path,
        None => {
            let dir = args.output_dir.unwrap_or_else(|| config.output.dir.clone());
            default_output_path(&dir, &input, &args.model)
        }
    };

    let client = ChatClient::new(&settings, &args.model)?;
    log::info!("Inferring genders with {} ({})", args.model, client.kind());
    log::info!("  Input: {}", input.display());
    log::info!("  Output: {}", output.display());

    let pipeline_config = genderline_infer::Config {
        input,
        output,
        columns: config.input.columns.clone(),
        resume: args.resume,
        limits,
        row_limit: args.limit,
    };

    let shutdown = ShutdownFlag::new();
    install_signal_handlers(&shutdown).context("Failed to install signal handlers")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let mut pipeline = Pipeline::new(
        pipeline_config,
        Arc::new(client),
        progress.clone(),
        shutdown,
    );
    let summary = runtime.block_on(pipeline.run())?;

    if progress.is_tty() {
        summary.print();
    } else {
        summary.log();
    }

    if summary.interrupted {
        log::warn!("Interrupted; rerun with --continue to finish");
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

/// Config file, then environment, then CLI flags; later sources win.
fn resolve_limits(
    args: &RunArgs,
    file: &LimitsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Limits> {
    let mut limits = Limits::default();
    overlay(&mut limits, file.max_loaded_models, file.num_parallel, file.max_queue);
    let mut limits = limits.apply_lookup(lookup)?;
    overlay(
        &mut limits,
        args.max_loaded_models,
        args.num_parallel,
        args.max_queue,
    );
    limits.validate()?;
    Ok(limits)
}

fn overlay(
    limits: &mut Limits,
    max_loaded_models: Option<usize>,
    num_parallel: Option<usize>,
    max_queue: Option<usize>,
) {
    if let Some(n) = max_loaded_models {
        limits.max_loaded_models = n;
    }
    if let Some(n) = num_parallel {
        limits.num_parallel = n;
    }
    if let Some(n) = max_queue {
        limits.max_queue = n;
    }
}
