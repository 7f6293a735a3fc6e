//! Test execution engine
//!
//! A [`Runner`] executes one discovered file and emits its lifecycle events.
//! Three isolation strategies share the same contract:
//!
//! - [`MainRunner`]: runs on the orchestrator's own runtime
//! - [`WorkerRunner`]: runs on a dedicated OS thread with its own runtime
//! - [`SubprocessRunner`]: re-executes the binary and reads events as JSON lines
//!
//! Isolated strategies relay events through [`FileProgress`], which turns a
//! dead execution unit into synthetic failures for every unfinished test.

mod file;
mod main_runner;
mod progress;
mod sink;
mod subprocess;
mod worker;

pub use file::execute_file;
pub use main_runner::MainRunner;
pub use progress::FileProgress;
pub use sink::{EventSink, JsonLinesSink};
pub use subprocess::SubprocessRunner;
pub use worker::WorkerRunner;

use clap::ValueEnum;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery::DiscoveredFile;
use crate::models::Event;

/// Channel carrying events back to the orchestrator
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Runner errors. Tests affected by them have already been reported as failed.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to start execution unit for {file}: {source}")]
    Spawn {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("execution unit for {file} crashed: {cause}")]
    Crashed { file: PathBuf, cause: String },

    #[error("execution of {file} was cancelled")]
    Cancelled { file: PathBuf },
}

/// Isolation strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    #[default]
    Main,
    Worker,
    Subprocess,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Main => write!(f, "main"),
            RunnerKind::Worker => write!(f, "worker"),
            RunnerKind::Subprocess => write!(f, "subprocess"),
        }
    }
}

/// How sibling tests inside one file are run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TestConcurrency {
    #[default]
    Serial,
    Parallel,
}

impl fmt::Display for TestConcurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestConcurrency::Serial => write!(f, "serial"),
            TestConcurrency::Parallel => write!(f, "parallel"),
        }
    }
}

/// Per-file execution options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Per-test timeout, unless the test overrides it
    pub timeout: Duration,
    pub test_concurrency: TestConcurrency,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            test_concurrency: TestConcurrency::Serial,
        }
    }
}

/// Executes one file's declared tests.
///
/// Implementations emit `openedFile`, then `startedTest`/`finishedTest` for
/// every declared test, then `closedFile`, and resolve once the file is done.
/// When `cancel` fires, in-flight tests are torn down and reported as failed.
pub trait Runner: Send + Sync {
    fn kind(&self) -> RunnerKind;

    fn execute_file(
        &self,
        file: Arc<DiscoveredFile>,
        options: ExecuteOptions,
        events: EventSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), RunnerError>>;
}

/// Build the runner for an isolation strategy
pub fn build_runner(kind: RunnerKind) -> anyhow::Result<Arc<dyn Runner>> {
    Ok(match kind {
        RunnerKind::Main => Arc::new(MainRunner),
        RunnerKind::Worker => Arc::new(WorkerRunner),
        RunnerKind::Subprocess => Arc::new(SubprocessRunner::current_exe()?),
    })
}
