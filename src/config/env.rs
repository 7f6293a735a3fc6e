//! Environment variable configuration
//!
//! Provides `TESTHIVE_*` overrides layered over the config file.

use clap::ValueEnum;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, RunConfig};
use crate::executor::{RunnerKind, TestConcurrency};

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTHIVE";

/// Overrides read from the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// TESTHIVE_CONCURRENCY
    pub concurrency: Option<usize>,
    /// TESTHIVE_RUNNER
    pub runner: Option<RunnerKind>,
    /// TESTHIVE_TIMEOUT_MS
    pub timeout_ms: Option<u64>,
    /// TESTHIVE_HALT_ON_ERRORS
    pub halt_on_errors: Option<bool>,
    /// TESTHIVE_TEST_MODE
    pub test_mode: Option<TestConcurrency>,
    /// TESTHIVE_CONFIG
    pub config_file: Option<PathBuf>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            concurrency: get_env_parse("CONCURRENCY")?,
            runner: get_env_enum("RUNNER")?,
            timeout_ms: get_env_parse("TIMEOUT_MS")?,
            halt_on_errors: get_env_bool("HALT_ON_ERRORS"),
            test_mode: get_env_enum("TEST_MODE")?,
            config_file: get_env("CONFIG").map(PathBuf::from),
        })
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Apply the overrides that are set
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
        if let Some(halt) = self.halt_on_errors {
            config.halt_on_errors = halt;
        }
        if let Some(mode) = self.test_mode {
            config.test_mode = mode;
        }
    }
}

fn var_name(name: &str) -> String {
    format!("{ENV_PREFIX}_{name}")
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(var_name(name)).ok().filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    get_env(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Env {
                name: var_name(name),
                value,
            })
        })
        .transpose()
}

/// Get environment variable as one of an enum's CLI names
fn get_env_enum<T: ValueEnum>(name: &str) -> Result<Option<T>, ConfigError> {
    get_env(name)
        .map(|value| {
            T::from_str(value.trim(), true).map_err(|_| ConfigError::Env {
                name: var_name(name),
                value,
            })
        })
        .transpose()
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all TESTHIVE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONCURRENCY     Files executing at once");
    println!("  {ENV_PREFIX}_RUNNER          Isolation strategy (main, worker, subprocess)");
    println!("  {ENV_PREFIX}_TIMEOUT_MS      Per-test timeout in milliseconds");
    println!("  {ENV_PREFIX}_HALT_ON_ERRORS  Stop at the first failing test (true/false)");
    println!("  {ENV_PREFIX}_TEST_MODE       Sibling tests (serial, parallel)");
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
}
