//! Logging utilities
//!
//! Logs go to stderr. Stdout belongs to reporters and, in `exec-file`, to the
//! event stream read by the parent process.

use clap::ValueEnum;
use std::fmt;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// An explicit level wins over `--verbose`
    pub fn select(explicit: Option<LogLevel>, verbose: bool) -> Self {
        match (explicit, verbose) {
            (Some(level), _) => level,
            (None, true) => LogLevel::Debug,
            (None, false) => LogLevel::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.to_tracing_level().to_string().to_lowercase();
        f.write_str(&level)
    }
}

/// Filter directive for the crate at the given level
fn directive(level: LogLevel) -> String {
    format!("testhive={level}")
}

/// Initialize the logger; `RUST_LOG` replaces the level when set
pub fn init_logger(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
