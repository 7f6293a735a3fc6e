//! Progress tracking for isolated execution units
//!
//! Relays events while remembering which tests have started and finished, so
//! a unit that dies mid-file can still be accounted for.

use std::collections::HashSet;
use tracing::warn;

use super::EventSink;
use crate::discovery::DiscoveredFile;
use crate::models::{Event, Scope, Status, TestError};

pub struct FileProgress<'a> {
    file: &'a DiscoveredFile,
    sink: &'a dyn EventSink,
    opened: bool,
    closed: bool,
    started: HashSet<Scope>,
    finished: HashSet<Scope>,
}

impl<'a> FileProgress<'a> {
    pub fn new(file: &'a DiscoveredFile, sink: &'a dyn EventSink) -> Self {
        Self {
            file,
            sink,
            opened: false,
            closed: false,
            started: HashSet::new(),
            finished: HashSet::new(),
        }
    }

    /// Record and forward one event
    pub fn forward(&mut self, event: Event) {
        match &event {
            Event::OpenedFile { .. } => self.opened = true,
            Event::ClosedFile { .. } => self.closed = true,
            Event::StartedTest { scope } => {
                self.started.insert(scope.clone());
            }
            Event::FinishedTest { scope, .. } => {
                self.finished.insert(scope.clone());
            }
            _ => {}
        }
        self.sink.emit(event);
    }

    /// Whether `closedFile` has been seen
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Declared tests without a `finishedTest` yet
    pub fn unfinished(&self) -> usize {
        self.file
            .tests
            .iter()
            .filter(|t| !self.finished.contains(&t.scope))
            .count()
    }

    /// Fail every unfinished test with `err` and close the file.
    ///
    /// Unstarted tests are started parent-first, then everything unfinished
    /// is finished child-first, so nesting stays well-formed.
    pub fn fail_remaining(mut self, err: TestError) {
        let pending = self.unfinished();
        if pending > 0 {
            warn!(file = %self.file.scope, tests = pending, "failing unfinished tests: {err}");
        }

        if !self.opened {
            self.forward(Event::OpenedFile {
                scope: self.file.scope.clone(),
            });
        }

        let file = self.file;
        for test in &file.tests {
            if !self.finished.contains(&test.scope) && !self.started.contains(&test.scope) {
                self.forward(Event::StartedTest {
                    scope: test.scope.clone(),
                });
            }
        }
        for test in file.tests.iter().rev() {
            if !self.finished.contains(&test.scope) {
                self.forward(Event::finished(
                    test.scope.clone(),
                    Status::Fail,
                    Some(err.clone()),
                ));
            }
        }

        if !self.closed {
            self.forward(Event::ClosedFile {
                scope: file.scope.clone(),
                err: Some(err),
            });
        }
    }
}
