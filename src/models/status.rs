//! Lifecycle state, outcome status and captured test errors

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of a test.
///
/// Variants are declared in rollup priority order, so the derived `Ord` puts
/// the highest priority first: `Fail < Pass < Skipped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Fail,
    Pass,
    Skipped,
}

impl Status {
    pub fn symbol(&self) -> &'static str {
        match self {
            Status::Pass => "✓",
            Status::Fail => "✗",
            Status::Skipped => "○",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Fail)
    }

    /// Highest-priority status of a set, `None` when the set is empty
    pub fn rollup(statuses: impl IntoIterator<Item = Status>) -> Option<Status> {
        statuses.into_iter().min()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pass => write!(f, "PASS"),
            Status::Fail => write!(f, "FAIL"),
            Status::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Lifecycle state of a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Pending,
    Started,
    Finished,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Started => write!(f, "started"),
            State::Finished => write!(f, "finished"),
        }
    }
}

/// Where a captured test error came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The test body returned an error
    Failure,
    /// The test body panicked
    Panic,
    /// The test exceeded its timeout
    Timeout,
    /// The run was cancelled while the test was in flight
    Cancelled,
    /// The execution unit running the test died
    Crash,
    /// Per-file setup failed before the test could run
    Setup,
    /// Per-file teardown failed after the file's tests ran
    Teardown,
    /// The run finished before the test did
    Incomplete,
}

/// Error captured for a failed test. Plain data so it can cross process boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema, thiserror::Error)]
#[error("{message}")]
pub struct TestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Capture an error returned by a test body, keeping its cause chain
    pub fn failure(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::Failure, format!("{err:#}"))
    }

    /// Capture a panic payload
    pub fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test panicked".to_string()
        };
        Self::new(ErrorKind::Panic, format!("panicked: {message}"))
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("timed out ({} ms)", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled")
    }

    pub fn crash(cause: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Crash, format!("execution unit crashed: {cause}"))
    }
}
