//! Worker thread runner
//!
//! Each file gets a dedicated OS thread with its own single-threaded runtime.
//! Events flow back over a channel; if the thread dies before closing the
//! file, the remaining tests are failed as crashed.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    execute_file, EventSender, ExecuteOptions, FileProgress, Runner, RunnerError, RunnerKind,
};
use crate::discovery::DiscoveredFile;
use crate::models::TestError;

#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerRunner;

impl Runner for WorkerRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Worker
    }

    fn execute_file(
        &self,
        file: Arc<DiscoveredFile>,
        options: ExecuteOptions,
        events: EventSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), RunnerError>> {
        let worker_file = file.clone();
        let worker_cancel = cancel.clone();
        async move {
            let path = file.path.clone();
            run_in_worker(file, events, move |tx| {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(execute_file(&worker_file, &options, &tx, &worker_cancel));
                Ok(())
            })
            .await?;
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled { file: path });
            }
            Ok(())
        }
        .boxed()
    }
}

/// Run `work` on a fresh thread and relay what it emits.
async fn run_in_worker<W>(
    file: Arc<DiscoveredFile>,
    events: EventSender,
    work: W,
) -> Result<(), RunnerError>
where
    W: FnOnce(EventSender) -> std::io::Result<()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = std::thread::Builder::new()
        .name("testhive-worker".to_string())
        .spawn(move || work(tx))
        .map_err(|source| RunnerError::Spawn {
            file: file.path.clone(),
            source,
        })?;
    debug!(file = %file.scope, "worker started");

    let mut progress = FileProgress::new(&file, &events);
    while let Some(event) = rx.recv().await {
        progress.forward(event);
    }

    // The channel only closes once the thread is done with it.
    let joined = tokio::task::spawn_blocking(move || handle.join()).await;
    let cause = match joined {
        Ok(Ok(Ok(()))) if progress.is_closed() => return Ok(()),
        Ok(Ok(Ok(()))) => "worker exited before closing the file".to_string(),
        Ok(Ok(Err(err))) => format!("worker runtime failed: {err}"),
        Ok(Err(payload)) => {
            let err = TestError::panic(payload.as_ref());
            format!("worker thread {}", err.message)
        }
        Err(err) => format!("worker join failed: {err}"),
    };

    warn!(file = %file.scope, "{cause}");
    progress.fail_remaining(TestError::crash(&cause));
    Err(RunnerError::Crashed {
        file: file.path.clone(),
        cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DeclaredTest, TestBody, TestContext};
    use crate::models::{ErrorKind, Event, Scope, Status};

    #[derive(Debug)]
    struct Pass;

    impl TestBody for Pass {
        fn run<'a>(&'a self, _ctx: &'a TestContext) -> BoxFuture<'a, anyhow::Result<()>> {
            async { Ok(()) }.boxed()
        }
    }

    fn file() -> Arc<DiscoveredFile> {
        Arc::new(
            DiscoveredFile::new("f", "f")
                .with_test(DeclaredTest::new(
                    Scope::from_names(["f", "a"]),
                    Some(Arc::new(Pass) as Arc<dyn TestBody>),
                ))
                .with_test(DeclaredTest::new(
                    Scope::from_names(["f", "b"]),
                    Some(Arc::new(Pass) as Arc<dyn TestBody>),
                )),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_worker_runs_file() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        WorkerRunner
            .execute_file(file(), ExecuteOptions::default(), tx, CancellationToken::new())
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 6);
        assert!(events
            .iter()
            .filter_map(Event::status)
            .all(|s| s == Status::Pass));
    }

    #[tokio::test]
    async fn test_worker_reports_cancellation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = WorkerRunner
            .execute_file(file(), ExecuteOptions::default(), tx, cancel)
            .await;

        assert!(matches!(result, Err(RunnerError::Cancelled { .. })));
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(Event::ClosedFile { .. })));
        assert_eq!(events[2].err().unwrap().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_worker_panic_fails_remaining() {
        let file = file();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let scope = file.scope.clone();
        let result = run_in_worker(file, tx, move |tx| {
            let _ = tx.send(Event::OpenedFile { scope: scope.clone() });
            let _ = tx.send(Event::StartedTest {
                scope: scope.child("a"),
            });
            let _ = tx.send(Event::finished(scope.child("a"), Status::Pass, None));
            panic!("worker blew up");
        })
        .await;

        assert!(matches!(result, Err(RunnerError::Crashed { .. })));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 6);
        assert_eq!(events[2].status(), Some(Status::Pass));
        let crashed = events[4].err().unwrap();
        assert_eq!(crashed.kind, ErrorKind::Crash);
        assert!(crashed.message.contains("worker blew up"));
        assert!(matches!(events[5], Event::ClosedFile { err: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_worker_exit_without_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = run_in_worker(file(), tx, |_tx| Ok(())).await;

        assert!(matches!(result, Err(RunnerError::Crashed { .. })));
        let events = drain(&mut rx);
        // opened, two started, two finished, closed
        assert_eq!(events.len(), 6);
        assert_eq!(events[3].status(), Some(Status::Fail));
    }
}
