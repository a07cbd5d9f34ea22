use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

use eclip_fold::aggregate::run_merge;
use eclip_fold::app::{App, FetchOptions};
use eclip_fold::config::{Config, ConfigLoader};
use eclip_fold::encode::EncodeHttpClient;
use eclip_fold::error::EclipError;
use eclip_fold::output::{ConsoleOutput, JsonOutput, OutputMode};
use eclip_fold::slurm::SbatchSubmitter;
use eclip_fold::store::DataStore;
use eclip_fold::viewer::{self, ViewerState};

#[derive(Parser)]
#[command(name = "eclip-fold")]
#[command(about = "Fetch ENCODE eCLIP peaks, submit folding jobs, merge and browse the results")]
#[command(version, author)]
struct Cli {
    /// Path to an eclip-fold.json config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover eCLIP experiments, download peak files and submit folding jobs")]
    Fetch(FetchArgs),
    #[command(about = "Merge per-experiment folding outputs into one table")]
    Merge(MergeArgs),
    #[command(about = "Serve the merged table as a filterable web page")]
    Serve(ServeArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    data_root: Option<PathBuf>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_submit: bool,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct MergeArgs {
    /// Directory holding `<cell line>/<protein>/` job outputs.
    #[arg(long)]
    root: Option<PathBuf>,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    table: Option<PathBuf>,

    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    max_rows: Option<usize>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EclipError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EclipError) -> u8 {
    match error {
        EclipError::MissingConfig(_)
        | EclipError::ConfigRead(_)
        | EclipError::ConfigParse(_)
        | EclipError::NothingToMerge(_) => 2,
        EclipError::EncodeHttp(_)
        | EclipError::EncodeStatus { .. }
        | EclipError::MissingTool(_)
        | EclipError::Submission(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch(args) => {
            init_tracing(None)?;
            run_fetch(args, &config, output_mode)
        }
        Commands::Merge(args) => {
            let log_file = args
                .log_file
                .clone()
                .unwrap_or_else(|| config.merge.log_file.clone());
            init_tracing(Some(&log_file))?;
            run_merge_command(args, &config, output_mode)
        }
        Commands::Serve(args) => {
            init_tracing(None)?;
            run_serve(args, &config)
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> miette::Result<()> {
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file_layer)
        .init();
    Ok(())
}

fn run_fetch(args: FetchArgs, config: &Config, output_mode: OutputMode) -> miette::Result<()> {
    let FetchArgs {
        data_root,
        dry_run,
        no_submit,
        limit,
    } = args;

    let data_root = data_root.unwrap_or_else(|| config.data_root.clone());
    let store = DataStore::new(&data_root)?;
    let encode = EncodeHttpClient::new(config.encode.clone())?;
    let submitter = SbatchSubmitter::new();
    if !dry_run && !no_submit && !submitter.is_available() {
        return Err(EclipError::MissingTool("sbatch (use --no-submit to skip submission)".to_string()).into());
    }

    let app = App::new(store, encode, submitter, config);
    let options = FetchOptions {
        dry_run,
        no_submit,
        limit,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.fetch(options, &JsonOutput)?;
            JsonOutput::print_fetch(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.fetch(options, &ConsoleOutput)?;
            ConsoleOutput::print_fetch_summary(&result);
        }
    }
    Ok(())
}

fn run_merge_command(
    args: MergeArgs,
    config: &Config,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let root = args.root.unwrap_or_else(|| config.data_root.clone());
    let output = args
        .output
        .unwrap_or_else(|| root.join(&config.merge.output_name));

    let report = run_merge(&root, &config.folding.output_suffix, &output)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_merge(&report).into_diagnostic()?,
        OutputMode::Interactive => ConsoleOutput::print_merge_summary(&report),
    }
    Ok(())
}

fn run_serve(args: ServeArgs, config: &Config) -> miette::Result<()> {
    let table = args.table.unwrap_or_else(|| config.viewer_table());
    let bind = args.bind.unwrap_or_else(|| config.viewer.bind.clone());
    let max_rows = args.max_rows.unwrap_or(config.viewer.max_rows);

    let state = ViewerState::load(&table, max_rows)?;
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(viewer::serve(state, &bind))?;
    Ok(())
}
