use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use conform::config::DEFAULT_CONFIG_FILE;
use conform::{
    load_config, run_harness, DetectionPolicy, ProcessRunner, Reporter, RunOptions, RunReport,
    ScratchContext,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "conform")]
#[command(
    about = "End-to-end conformance harness: gates, compile, link, run, and compare against golden answers.",
    long_about = None
)]
struct Cli {
    /// Harness configuration (JSON). Built-in defaults apply when the default file is absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Working directory.
    #[arg(short = 'C', long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Run only these declared cases (repeatable). Declared order is kept.
    #[arg(long = "case", value_name = "NAME")]
    cases: Vec<String>,

    /// Print the declared cases and exit.
    #[arg(long)]
    list: bool,

    /// Skip the static-analysis and unit-test gates.
    #[arg(long)]
    skip_gates: bool,

    /// Token added to scratch artifact names so concurrent runs do not collide.
    #[arg(long, value_name = "TOKEN")]
    run_id: Option<String>,

    /// Failure detection policy (overrides the config).
    #[arg(long, value_enum)]
    detection: Option<DetectionPolicy>,

    /// Exit non-zero unless every case passed.
    #[arg(long)]
    strict: bool,

    /// With --strict, count freshly recorded golden answers as passing.
    #[arg(long, requires = "strict")]
    accept_new: bool,

    /// Enable verbose logging (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// Set log level (overrides --verbose/--quiet).
    #[arg(long, value_enum)]
    log: Option<LogLevel>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet, cli.log)?;

    if let Some(dir) = &cli.directory {
        std::env::set_current_dir(dir)
            .with_context(|| format!("change directory: {}", dir.display()))?;
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&config_path, cli.config.is_some())?;
    if let Some(detection) = cli.detection {
        config.detection = detection;
    }

    if cli.list {
        for c in &config.cases {
            println!("{c}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(id) = &cli.run_id {
        if id.is_empty() || id.contains(['/', '\\', '.']) {
            anyhow::bail!("--run-id must be a plain token, got {id:?}");
        }
    }

    let options = RunOptions {
        cases: config.select_cases(&cli.cases)?,
        skip_gates: cli.skip_gates,
        scratch: ScratchContext::new(&config.scratch_dir).with_run_id(cli.run_id.clone()),
    };
    info!(
        root = %config.root.display(),
        cases = options.cases.len(),
        detection = config.detection.as_str(),
        "starting run"
    );

    let mut runner = ProcessRunner::new(&config.root);
    let mut report = Reporter::new(std::io::stdout().lock());
    let run = run_harness(&config, &options, &mut runner, &mut report)?;

    let code = match &run {
        RunReport::GateFailed(_) => ExitCode::from(1),
        RunReport::Completed(_) if cli.strict && !run.all_passed(cli.accept_new) => {
            ExitCode::from(1)
        }
        RunReport::Completed(_) => ExitCode::SUCCESS,
    };
    Ok(code)
}

fn setup_logging(verbose: u8, quiet: bool, log_level: Option<LogLevel>) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Some(level) = log_level {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(formatter)
        .try_init()
        .context("initialize logging")
}
