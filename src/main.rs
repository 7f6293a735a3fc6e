//! testhive - declarative test runner
//!
//! Discovers suite files, executes them concurrently under a configurable
//! isolation strategy, and reports lifecycle events as they happen.
//!
//! ## Features
//!
//! - Bounded file concurrency with FIFO scheduling
//! - Three isolation strategies: main runtime, worker thread, subprocess
//! - Per-test timeouts, panic capture and crash recovery
//! - Console, JSON and CSV reporters
//! - Watch mode re-running changed suite files
//!
//! ## Usage
//!
//! ```bash
//! # Run every suite under ./tests
//! testhive run tests
//!
//! # Isolate each file in its own process
//! testhive run tests --runner subprocess --concurrency 4
//!
//! # Re-run on changes
//! testhive watch tests
//!
//! # Show discovered tests
//! testhive list tests
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli;
mod config;
mod discovery;
mod dispatch;
mod executor;
mod models;
mod orchestrator;
mod output;
mod scheduler;
mod state;
mod utils;
mod watcher;

use cli::{Args, ConfigAction, ConfigFormat, HaltOnErrors, RunArgs, SchemaTarget};
use config::{ConfigFile, EnvConfig, RunConfig};
use discovery::{Discovery, SuiteDiscovery, SuiteFile};
use dispatch::Reporter;
use executor::{build_runner, execute_file, ExecuteOptions, JsonLinesSink};
use orchestrator::Orchestrator;
use utils::{init_logger, LogLevel};
use watcher::Watcher;

/// Exit code for infrastructure failures
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(LogLevel::select(args.log_level, args.verbose));

    let outcome = match args.command {
        cli::Command::Run(run_args) => run_tests(run_args).await,
        cli::Command::Watch(run_args) => watch_tests(run_args).await,
        cli::Command::List(list_args) => list_tests(list_args).map(|_| 0),
        cli::Command::Config(config_args) => manage_config(config_args).map(|_| 0),
        cli::Command::ExecFile(exec_args) => exec_file(exec_args).await.map(|_| 0),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Defaults, config file, environment, then command line flags
fn load_config(explicit: Option<&Path>, args: Option<&RunArgs>) -> Result<RunConfig> {
    let env = EnvConfig::load()?;
    let explicit = explicit.or(env.config_file.as_deref());

    let file = match ConfigFile::locate(explicit)? {
        Some((path, file)) => {
            info!(path = %path.display(), "loaded config file");
            Some(file)
        }
        None => None,
    };

    let mut config = RunConfig::resolve(file, &env);
    if let Some(args) = args {
        args.apply(&mut config);
    }
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: &RunConfig) -> Result<Orchestrator> {
    let runner = build_runner(config.runner)?;
    Ok(Orchestrator::new(
        Arc::new(config.discovery()),
        runner,
        config.run_options()?,
    ))
}

fn reporters(config: &RunConfig, cancel: &CancellationToken) -> Vec<Box<dyn Reporter>> {
    let mut reporters = vec![output::stdout_reporter(config.reporter)];
    if config.halt_on_errors {
        reporters.push(Box::new(HaltOnErrors::new(cancel.clone())));
    }
    reporters
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn run_tests(args: RunArgs) -> Result<u8> {
    let config = load_config(args.config.as_deref(), Some(&args))?;
    let orchestrator = build_orchestrator(&config)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = orchestrator
        .run(&args.paths, reporters(&config, &cancel), cancel)
        .await?;

    if summary.unit_errors > 0 {
        warn!(
            files = summary.unit_errors,
            "some files did not complete normally"
        );
    }
    for (reporter, failures) in summary.reporters.iter().zip(&summary.reporter_failures) {
        if *failures > 0 {
            warn!(reporter = reporter.name(), failures, "reporter failed");
        }
    }
    info!(
        files = summary.files,
        nodes = summary.tree.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );

    Ok(output::exit_code(summary.tree.root().status()))
}

async fn watch_tests(args: RunArgs) -> Result<u8> {
    let config = load_config(args.config.as_deref(), Some(&args))?;
    let orchestrator = build_orchestrator(&config)?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let watcher = Watcher::new(orchestrator, args.paths.clone(), config.debounce());
    watcher
        .watch(|cancel| reporters(&config, cancel), shutdown)
        .await?;
    Ok(0)
}

fn list_tests(args: cli::ListArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), None)?;
    let discovery = config.discovery();

    let mut files = 0;
    let mut tests = 0;
    for root in &args.paths {
        for file in discovery.discover(root)? {
            files += 1;
            tests += file.tests.len();
            println!("{}", file.scope);
            if args.files {
                continue;
            }
            for test in &file.tests {
                let indent = "  ".repeat(test.scope.level() - 1);
                let skip = if test.is_skipped() { " (skip)" } else { "" };
                println!("{indent}{}{skip}", test.scope.name().unwrap_or_default());
            }
        }
    }

    println!();
    println!("{files} files, {tests} tests");
    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            let config = ConfigFile::example();
            config.save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
        }

        ConfigAction::Show { config, format } => {
            let run = load_config(config.as_deref(), None)?;
            let file = ConfigFile {
                run,
                ..ConfigFile::default()
            };
            let output = match format {
                ConfigFormat::Json => serde_json::to_string_pretty(&file)?,
                ConfigFormat::Yaml => serde_yaml::to_string(&file)?,
            };
            println!("{output}");
        }

        ConfigAction::Schema { target } => {
            let schema = match target {
                SchemaTarget::Config => schemars::schema_for!(ConfigFile),
                SchemaTarget::Suite => schemars::schema_for!(SuiteFile),
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        ConfigAction::Env => {
            config::print_env_help();
            let env = EnvConfig::load()?;
            if env.has_any() {
                println!();
                println!("Currently set: {env:#?}");
            }
        }
    }

    Ok(())
}

/// Subprocess entry point: run one file, events go to stdout as JSON lines
async fn exec_file(args: cli::ExecFileArgs) -> Result<()> {
    let file = SuiteDiscovery::default().load(&args.path, &args.scope_name)?;
    let options = ExecuteOptions {
        timeout: Duration::from_millis(args.timeout_ms),
        test_concurrency: args.test_mode,
    };

    let sink = JsonLinesSink::new(std::io::stdout());
    let cancel = CancellationToken::new();
    execute_file(&file, &options, &sink, &cancel).await;
    Ok(())
}
