//! Lifecycle events
//!
//! The closed set of events flowing from runners through dispatch to reporters.
//! Events are plain data: the subprocess runner ships them as JSON lines.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Scope, Status, TestError};

/// Event kind tag, used for logging and reporter fallbacks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AddedFile,
    OpenedFile,
    ClosedFile,
    AddedTest,
    StartedTest,
    FinishedTest,
    FinishedAllTests,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AddedFile => "addedFile",
            EventKind::OpenedFile => "openedFile",
            EventKind::ClosedFile => "closedFile",
            EventKind::AddedTest => "addedTest",
            EventKind::StartedTest => "startedTest",
            EventKind::FinishedTest => "finishedTest",
            EventKind::FinishedAllTests => "finishedAllTests",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lifecycle event tagged by scope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    AddedFile {
        scope: Scope,
    },
    OpenedFile {
        scope: Scope,
    },
    ClosedFile {
        scope: Scope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<TestError>,
    },
    AddedTest {
        scope: Scope,
    },
    StartedTest {
        scope: Scope,
    },
    /// Absent status means pass
    FinishedTest {
        scope: Scope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<Status>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<TestError>,
    },
    FinishedAllTests,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AddedFile { .. } => EventKind::AddedFile,
            Event::OpenedFile { .. } => EventKind::OpenedFile,
            Event::ClosedFile { .. } => EventKind::ClosedFile,
            Event::AddedTest { .. } => EventKind::AddedTest,
            Event::StartedTest { .. } => EventKind::StartedTest,
            Event::FinishedTest { .. } => EventKind::FinishedTest,
            Event::FinishedAllTests => EventKind::FinishedAllTests,
        }
    }

    pub fn scope(&self) -> Option<&Scope> {
        match self {
            Event::AddedFile { scope }
            | Event::OpenedFile { scope }
            | Event::ClosedFile { scope, .. }
            | Event::AddedTest { scope }
            | Event::StartedTest { scope }
            | Event::FinishedTest { scope, .. } => Some(scope),
            Event::FinishedAllTests => None,
        }
    }

    pub fn err(&self) -> Option<&TestError> {
        match self {
            Event::ClosedFile { err, .. } | Event::FinishedTest { err, .. } => err.as_ref(),
            _ => None,
        }
    }

    /// Status carried by a `finishedTest`, defaulting to pass
    pub fn status(&self) -> Option<Status> {
        match self {
            Event::FinishedTest { status, .. } => Some(status.unwrap_or(Status::Pass)),
            _ => None,
        }
    }

    pub fn finished(scope: Scope, status: Status, err: Option<TestError>) -> Self {
        Event::FinishedTest {
            scope,
            status: Some(status),
            err,
        }
    }
}
