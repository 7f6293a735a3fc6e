//! Output module
//!
//! Built-in reporters rendering lifecycle events as console text, JSON or CSV.

mod console;
mod csv;
mod json;

pub use self::console::ConsoleReporter;
pub use self::csv::CsvReporter;
pub use self::json::JsonReporter;

use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::IsTerminal;

use crate::dispatch::Reporter;
use crate::models::Status;

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    Console,
    Json,
    Csv,
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReporterKind::Console => write!(f, "console"),
            ReporterKind::Json => write!(f, "json"),
            ReporterKind::Csv => write!(f, "csv"),
        }
    }
}

/// Reporter of the given kind writing to stdout
pub fn stdout_reporter(kind: ReporterKind) -> Box<dyn Reporter> {
    let stdout = std::io::stdout();
    match kind {
        ReporterKind::Console => {
            let colorize = stdout.is_terminal();
            let reporter = ConsoleReporter::new(stdout);
            Box::new(if colorize { reporter } else { reporter.no_color() })
        }
        ReporterKind::Json => Box::new(JsonReporter::new(stdout)),
        ReporterKind::Csv => Box::new(CsvReporter::new(stdout)),
    }
}

/// Process exit code for a finished run's root status
pub fn exit_code(status: Option<Status>) -> u8 {
    match status {
        Some(Status::Fail) => 1,
        Some(Status::Pass) | Some(Status::Skipped) | None => 0,
    }
}
