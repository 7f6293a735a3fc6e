//! Configuration module
//!
//! Layers, lowest precedence first: built-in defaults, config file,
//! `TESTHIVE_*` environment variables, command line flags.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::discovery::{CommandBody, SuiteDiscovery, DEFAULT_SUFFIXES};
use crate::executor::{ExecuteOptions, RunnerKind, TestConcurrency};
use crate::orchestrator::{FileHooks, RunOptions};
use crate::output::ReporterKind;
use crate::state::IncompletePolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid value '{value}' for {name}")]
    Env { name: String, value: String },

    #[error("invalid {hook} command: {message}")]
    Hook { hook: &'static str, message: String },
}

/// Run configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Files executing at once
    pub concurrency: usize,

    /// Isolation strategy
    pub runner: RunnerKind,

    /// Per-test timeout in milliseconds
    pub timeout_ms: u64,

    /// How sibling tests inside a file run
    pub test_mode: TestConcurrency,

    /// Cancel the run on the first failing test
    pub halt_on_errors: bool,

    /// What happens to tests still unfinished when the run ends
    pub incomplete: IncompletePolicy,

    pub reporter: ReporterKind,

    /// File name suffixes that mark suite files
    pub test_suffixes: Vec<String>,

    /// Command run before each file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_file: Option<String>,

    /// Command run after each file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_file: Option<String>,

    /// Watch mode debounce window in milliseconds
    pub watch_debounce_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            runner: RunnerKind::Main,
            timeout_ms: 5000,
            test_mode: TestConcurrency::Serial,
            halt_on_errors: false,
            incomplete: IncompletePolicy::Fail,
            reporter: ReporterKind::Console,
            test_suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            setup_file: None,
            teardown_file: None,
            watch_debounce_ms: 200,
        }
    }
}

impl RunConfig {
    /// Defaults, then the file, then the environment
    pub fn resolve(file: Option<ConfigFile>, env: &EnvConfig) -> Self {
        let mut config = file.map(|f| f.run).unwrap_or_default();
        env.apply(&mut config);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.test_suffixes.is_empty() || self.test_suffixes.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Invalid(
                "test_suffixes must list non-empty suffixes".into(),
            ));
        }
        self.hooks()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn discovery(&self) -> SuiteDiscovery {
        SuiteDiscovery::new(self.test_suffixes.clone())
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            timeout: self.timeout(),
            test_concurrency: self.test_mode,
        }
    }

    pub fn hooks(&self) -> Result<FileHooks, ConfigError> {
        let parse = |hook: &'static str, line: &Option<String>| {
            line.as_deref()
                .map(CommandBody::parse)
                .transpose()
                .map_err(|e| ConfigError::Hook {
                    hook,
                    message: format!("{e:#}"),
                })
        };
        Ok(FileHooks {
            setup: parse("setup_file", &self.setup_file)?,
            teardown: parse("teardown_file", &self.teardown_file)?,
        })
    }

    pub fn run_options(&self) -> Result<RunOptions, ConfigError> {
        Ok(RunOptions {
            concurrency: self.concurrency,
            execute: self.execute_options(),
            incomplete: self.incomplete,
            hooks: self.hooks()?,
        })
    }
}
