//! genderline - infer author genders from paper records with a chat model
//!
//! Reads first/last author names from a TSV of papers, asks a local or hosted
//! model about each unique author and appends the answers to a resumable TSV.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use genderline_core::{ProgressContext, SharedProgress, Verbosity};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "genderline")]
#[command(about = "Infer author genders from paper records with a chat model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./genderline.toml or ~/.config/genderline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Infer genders for the authors of a papers file
    Run(cmd::run::RunArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug (the progress bar shows activity)
    //   non-TTY: info unless --debug (logs are the only progress indicator)
    let is_tty = progress.is_tty();
    let verbosity = match (cli.debug, is_tty) {
        (true, _) => Verbosity::Debug,
        (false, true) => Verbosity::Quiet,
        (false, false) => Verbosity::Normal,
    };
    genderline_core::init_logging(verbosity, is_tty.then(|| progress.multi()));

    match dispatch(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli, progress: &SharedProgress) -> Result<ExitCode> {
    let config = match cli.config {
        Some(path) => Config::from_file(&path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, progress),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
    use genderline_core::Limits;

    let limit = |value: Option<usize>, var: &str, default: usize| match value {
        Some(n) => n.to_string(),
        None => match std::env::var(var) {
            Ok(raw) => format!("{raw} (${var})"),
            Err(_) => format!("{default} (default)"),
        },
    };
    let defaults = Limits::default();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Input file", &config.input.data.display().to_string()]);
    table.add_row(vec!["Output directory", &config.output.dir.display().to_string()]);
    table.add_row(vec!["Backend", &config.backend.kind]);
    table.add_row(vec!["Local model URL", &config.backend.local_url]);
    table.add_row(vec!["Hosted chat URL", &config.backend.hosted_url]);
    table.add_row(vec![
        "API key",
        if config.backend.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec![
        "Request timeout",
        &format!("{}s", config.backend.timeout_secs),
    ]);
    table.add_row(vec![
        "Max loaded models",
        &limit(
            config.limits.max_loaded_models,
            genderline_core::limits::ENV_MAX_LOADED_MODELS,
            defaults.max_loaded_models,
        ),
    ]);
    table.add_row(vec![
        "Parallel requests",
        &limit(
            config.limits.num_parallel,
            genderline_core::limits::ENV_NUM_PARALLEL,
            defaults.num_parallel,
        ),
    ]);
    table.add_row(vec![
        "Queue capacity",
        &limit(
            config.limits.max_queue,
            genderline_core::limits::ENV_MAX_QUEUE,
            defaults.max_queue,
        ),
    ]);
    let columns = &config.input.columns;
    table.add_row(vec![
        "First author columns",
        &format!(
            "{} / {}",
            columns.first_author_first_name, columns.first_author_last_name
        ),
    ]);
    table.add_row(vec![
        "Last author columns",
        &format!(
            "{} / {}",
            columns.last_author_first_name, columns.last_author_last_name
        ),
    ]);

    eprintln!("\n{table}");
}
