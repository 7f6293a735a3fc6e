//! CLI argument parsing
//!
//! Defines command-line interface using clap.

mod halt;

pub use halt::HaltOnErrors;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::executor::{RunnerKind, TestConcurrency};
use crate::output::ReporterKind;
use crate::state::IncompletePolicy;
use crate::utils::LogLevel;

/// Declarative test runner with isolated, concurrent file execution
#[derive(Parser, Debug)]
#[command(name = "testhive")]
#[command(version)]
#[command(about = "Run declarative test suites with isolated, concurrent file execution")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level, overrides --verbose
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover and run test suites
    Run(RunArgs),

    /// Run once, then re-run on file changes
    Watch(RunArgs),

    /// List discovered files and tests
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Execute a single file and stream its events as JSON lines
    #[command(name = "exec-file", hide = true)]
    ExecFile(ExecFileArgs),
}

/// Arguments shared by run and watch
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Files or directories to search for suite files
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Files executing at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Isolation strategy
    #[arg(short, long, value_enum)]
    pub runner: Option<RunnerKind>,

    /// Per-test timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// How sibling tests inside a file run
    #[arg(long, value_enum)]
    pub test_mode: Option<TestConcurrency>,

    /// Output format
    #[arg(long, value_enum)]
    pub reporter: Option<ReporterKind>,

    /// Stop at the first failing test
    #[arg(long)]
    pub halt_on_errors: bool,

    /// What happens to tests unfinished at the end of the run
    #[arg(long, value_enum)]
    pub incomplete: Option<IncompletePolicy>,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    /// Apply the flags given on the command line
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(runner) = self.runner {
            config.runner = runner;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(mode) = self.test_mode {
            config.test_mode = mode;
        }
        if let Some(reporter) = self.reporter {
            config.reporter = reporter;
        }
        if self.halt_on_errors {
            config.halt_on_errors = true;
        }
        if let Some(incomplete) = self.incomplete {
            config.incomplete = incomplete;
        }
    }
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Files or directories to search for suite files
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Show files only
    #[arg(short, long)]
    pub files: bool,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the subprocess entry point
#[derive(Parser, Debug)]
pub struct ExecFileArgs {
    /// Suite file to execute
    pub path: PathBuf,

    /// Name of the file scope, as the parent process knows it
    #[arg(long)]
    pub scope_name: String,

    #[arg(long)]
    pub timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = TestConcurrency::Serial)]
    pub test_mode: TestConcurrency,
}

/// Arguments for configuration management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,
    },

    /// Write an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "testhive.yaml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print a JSON Schema
    Schema {
        #[arg(value_enum, default_value_t = SchemaTarget::Config)]
        target: SchemaTarget,
    },

    /// List environment variables
    Env,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SchemaTarget {
    /// Configuration file
    Config,
    /// Suite file
    Suite,
}
