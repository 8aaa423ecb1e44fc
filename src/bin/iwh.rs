use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use iw_harmonizer::config::{ConfigLoader, ResolvedConfig};
use iw_harmonizer::error::HarmonizeError;
use iw_harmonizer::output::{
    ConsoleProgress, JsonOutput, OutputMode, print_check_summary, print_run_summary,
};
use iw_harmonizer::pipeline::{Pipeline, ProgressSink, RunOptions};
use iw_harmonizer::source::JsonSnapshotLoader;
use iw_harmonizer::store::OutputStore;

#[derive(Parser)]
#[command(name = "iwh")]
#[command(about = "Harmonizes characterization factors into a canonical LCIA master dataset and links it to LCA tools")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build both carbon accounting views and export every target")]
    Run(RunArgs),
    #[command(about = "Validate the config and source snapshot without exporting")]
    Check(CheckArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    source: Option<Utf8PathBuf>,

    #[arg(long)]
    out: Option<Utf8PathBuf>,

    /// Restrict linking to these target vocabularies.
    #[arg(long = "target")]
    targets: Vec<String>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    source: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarmonizeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarmonizeError) -> u8 {
    match error {
        HarmonizeError::MissingConfig
        | HarmonizeError::ConfigRead(_)
        | HarmonizeError::MissingSource(_) => 2,
        HarmonizeError::SourceSchema { .. }
        | HarmonizeError::IncompleteFamily { .. }
        | HarmonizeError::MissingReferenceFlow { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Check(args) => run_check(args, output_mode),
    }
}

fn load_config(
    path: Option<&str>,
    source: Option<Utf8PathBuf>,
) -> Result<ResolvedConfig, HarmonizeError> {
    let mut config = ConfigLoader::resolve(path)?;
    if let Some(source) = source {
        config.source = source;
    }
    Ok(config)
}

fn sink(output_mode: OutputMode) -> Box<dyn ProgressSink> {
    match output_mode {
        OutputMode::Interactive => Box::new(ConsoleProgress),
        OutputMode::NonInteractive => Box::new(JsonOutput),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let RunArgs {
        config,
        source,
        out,
        targets,
        dry_run,
    } = args;

    let mut config = load_config(config.as_deref(), source)?;
    config.select_targets(&targets)?;
    let store = OutputStore::new(out.unwrap_or_else(|| config.output.clone()));
    let loader = JsonSnapshotLoader::new(config.source.clone());
    let pipeline = Pipeline::new(loader, config);

    let sink = sink(output_mode);
    let result = pipeline.run(RunOptions { dry_run }, sink.as_ref())?;
    let files = if dry_run {
        store.planned_files(&result)
    } else {
        store.export(&result)?
    };

    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_run(&result.summary, &files).into_diagnostic()?;
        }
        OutputMode::Interactive => print_run_summary(&result.summary, &files),
    }
    Ok(())
}

fn run_check(args: CheckArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = load_config(args.config.as_deref(), args.source)?;
    let loader = JsonSnapshotLoader::new(config.source.clone());
    let pipeline = Pipeline::new(loader, config);

    let sink = sink(output_mode);
    let result = pipeline.check(sink.as_ref())?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_check(&result).into_diagnostic()?,
        OutputMode::Interactive => print_check_summary(&result),
    }
    Ok(())
}
