//! File executor
//!
//! Runs the declared tests of one file depth-first. Every strategy ends up
//! here: in-process, on a worker thread, or inside a child process.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{EventSink, ExecuteOptions, TestConcurrency};
use crate::discovery::{DeclaredTest, DiscoveredFile, TestContext, TestMode};
use crate::models::{Event, Scope, Status, TestError};

/// Execute a file, emitting `openedFile`, test events and `closedFile`
pub async fn execute_file(
    file: &DiscoveredFile,
    options: &ExecuteOptions,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) {
    let start = Instant::now();
    info!(file = %file.scope, tests = file.tests.len(), "executing file");

    sink.emit(Event::OpenedFile {
        scope: file.scope.clone(),
    });

    let exec = FileExecution {
        file,
        options,
        sink,
        cancel,
    };
    exec.run_children(&file.scope, false).await;

    sink.emit(Event::ClosedFile {
        scope: file.scope.clone(),
        err: None,
    });

    debug!(
        file = %file.scope,
        "file finished in {}ms",
        start.elapsed().as_millis()
    );
}

struct FileExecution<'a> {
    file: &'a DiscoveredFile,
    options: &'a ExecuteOptions,
    sink: &'a dyn EventSink,
    cancel: &'a CancellationToken,
}

impl<'a> FileExecution<'a> {
    /// Run the direct children of `parent`, returning their statuses
    fn run_children(&'a self, parent: &'a Scope, skipped: bool) -> BoxFuture<'a, Vec<Status>> {
        async move {
            let children: Vec<&DeclaredTest> = self.file.children_of(parent).collect();
            match self.options.test_concurrency {
                TestConcurrency::Serial => {
                    let mut statuses = Vec::with_capacity(children.len());
                    for test in children {
                        statuses.push(self.run_test(test, skipped).await);
                    }
                    statuses
                }
                TestConcurrency::Parallel => {
                    join_all(children.into_iter().map(|test| self.run_test(test, skipped))).await
                }
            }
        }
        .boxed()
    }

    /// Start a test, run its body and its children, then finish it
    async fn run_test(&'a self, test: &'a DeclaredTest, parent_skipped: bool) -> Status {
        self.sink.emit(Event::StartedTest {
            scope: test.scope.clone(),
        });

        let skipped = parent_skipped || test.is_skipped();
        if let TestMode::Skip { reason: Some(reason) } = &test.mode {
            debug!(test = %test.scope, "skipped: {reason}");
        }

        let outcome = if skipped {
            None
        } else {
            self.run_body(test).await
        };

        let children = self.run_children(&test.scope, skipped).await;

        let (status, err) = match outcome {
            Some(result) => result,
            None if skipped => (Status::Skipped, None),
            // Containers are only skipped when everything below them was.
            None if !children.is_empty() && children.iter().all(|s| *s == Status::Skipped) => {
                (Status::Skipped, None)
            }
            None => (Status::Pass, None),
        };

        self.sink
            .emit(Event::finished(test.scope.clone(), status, err));
        status
    }

    /// Run a test body under its timeout. `None` when the test has no body.
    async fn run_body(&self, test: &DeclaredTest) -> Option<(Status, Option<TestError>)> {
        let body = test.body.as_ref()?;
        let ctx = TestContext {
            scope: test.scope.clone(),
            file: self.file.path.clone(),
            cancel: self.cancel.child_token(),
        };
        let timeout = test.timeout.unwrap_or(self.options.timeout);

        if self.cancel.is_cancelled() {
            return Some((Status::Fail, Some(TestError::cancelled())));
        }

        let guarded = AssertUnwindSafe(async { body.run(&ctx).await }).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => (Status::Fail, Some(TestError::cancelled())),
            result = tokio::time::timeout(timeout, guarded) => match result {
                Err(_) => (Status::Fail, Some(TestError::timeout(timeout))),
                Ok(Err(payload)) => (Status::Fail, Some(TestError::panic(payload.as_ref()))),
                Ok(Ok(Err(err))) => (Status::Fail, Some(TestError::failure(&err))),
                Ok(Ok(Ok(()))) => (Status::Pass, None),
            },
        };

        ctx.cancel.cancel();
        Some(outcome)
    }
}
