//! Run orchestration
//!
//! Wires discovery, the file scheduler, the runner and event dispatch into a
//! single run. The dispatcher (and with it the state tree) lives on the task
//! calling [`Orchestrator::run`]; execution units only send events back over
//! a channel.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::{CommandBody, DiscoveredFile, Discovery, DiscoveryError, TestBody, TestContext};
use crate::dispatch::{Dispatcher, Reporter};
use crate::executor::{EventSender, ExecuteOptions, FileProgress, Runner};
use crate::models::{ErrorKind, Event, TestError};
use crate::scheduler::{with_timeout_cancelling, Discipline, Scheduler, SchedulerError, TaskHandle};
use crate::state::{IncompletePolicy, StateError, StateTree};

/// Errors fatal to a run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("discovery produced an inconsistent tree: {0}")]
    State(#[from] StateError),
}

/// Commands run around every file, serialized across files
#[derive(Clone, Debug, Default)]
pub struct FileHooks {
    pub setup: Option<CommandBody>,
    pub teardown: Option<CommandBody>,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Files executing at once
    pub concurrency: usize,
    pub execute: ExecuteOptions,
    pub incomplete: IncompletePolicy,
    pub hooks: FileHooks,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            execute: ExecuteOptions::default(),
            incomplete: IncompletePolicy::default(),
            hooks: FileHooks::default(),
        }
    }
}

/// Outcome of a run
pub struct RunSummary {
    pub tree: StateTree,
    pub reporters: Vec<Box<dyn Reporter>>,
    pub reporter_failures: Vec<usize>,
    pub files: usize,
    /// Files whose execution unit crashed, was cancelled or failed its hooks
    pub unit_errors: usize,
    pub elapsed: Duration,
}

pub struct Orchestrator {
    discovery: Arc<dyn Discovery>,
    runner: Arc<dyn Runner>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(discovery: Arc<dyn Discovery>, runner: Arc<dyn Runner>, options: RunOptions) -> Self {
        Self {
            discovery,
            runner,
            options,
        }
    }

    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    /// Discover every root, execute all files and return the finished tree.
    ///
    /// Firing `cancel` tears down in-flight files; their unfinished tests are
    /// reported as failed and the run still completes normally. On a fatal
    /// error every file already scheduled is cancelled and awaited before the
    /// error is returned.
    pub async fn run(
        &self,
        paths: &[PathBuf],
        reporters: Vec<Box<dyn Reporter>>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, OrchestratorError> {
        let start = Instant::now();
        let mut dispatcher = Dispatcher::new(reporters).with_policy(self.options.incomplete);
        dispatcher.begin();

        let scheduler =
            Scheduler::with_discipline(self.options.concurrency, Discipline::AtRegistration);
        scheduler.on_drain(|| debug!("file scheduler drained"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let files = FileQueue {
            scheduler: scheduler.clone(),
            hooks: Scheduler::serial(),
            events: tx,
            cancel: cancel.child_token(),
        };

        info!(
            runner = %self.runner.kind(),
            concurrency = scheduler.limit(),
            discipline = ?scheduler.discipline(),
            roots = paths.len(),
            "starting run"
        );

        // Nothing may drain the scheduler while files are still being found.
        let discovering = scheduler.hold();
        let scheduled = self.schedule(paths, &mut dispatcher, &files);
        drop(discovering);

        let handles = match scheduled {
            Ok(handles) => handles,
            Err(err) => {
                warn!("aborting run: {err}");
                files.cancel.cancel();
                scheduler.drained().await;
                return Err(err);
            }
        };

        loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => relay(&mut dispatcher, event),
                _ = scheduler.drained() => break,
            }
        }
        // Every task sends its events before it settles.
        while let Ok(event) = rx.try_recv() {
            relay(&mut dispatcher, event);
        }

        let files = handles.len();
        let mut unit_errors = 0;
        for handle in handles {
            if let Err(err) = handle.await {
                unit_errors += 1;
                warn!("{err}");
            }
        }

        dispatcher.dispatch(Event::FinishedAllTests)?;

        let reporter_failures = dispatcher.reporter_failures().to_vec();
        let (tree, reporters) = dispatcher.into_parts();
        let elapsed = start.elapsed();
        info!(
            files,
            status = ?tree.root().status(),
            "run finished in {}ms",
            elapsed.as_millis()
        );

        Ok(RunSummary {
            tree,
            reporters,
            reporter_failures,
            files,
            unit_errors,
            elapsed,
        })
    }

    /// Discover every root and schedule one task per file not seen before
    fn schedule(
        &self,
        paths: &[PathBuf],
        dispatcher: &mut Dispatcher,
        files: &FileQueue,
    ) -> Result<Vec<TaskHandle<()>>, OrchestratorError> {
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for root in paths {
            for file in self.discovery.discover(root)? {
                if !seen.insert(file.scope.clone()) {
                    debug!(file = %file.scope, "file already scheduled");
                    continue;
                }

                let added = file.added_events();
                let task = FileTask {
                    runner: self.runner.clone(),
                    options: self.options.clone(),
                    hooks: files.hooks.clone(),
                    file: Arc::new(file),
                    events: files.events.clone(),
                    cancel: files.cancel.child_token(),
                };
                let slot = files.scheduler.wrap(move || task.run());

                for event in added {
                    dispatcher.dispatch(event)?;
                }
                handles.push(slot.call());
            }
        }
        Ok(handles)
    }
}

/// Where discovered files are scheduled during one run
struct FileQueue {
    scheduler: Scheduler,
    /// Serializes setup and teardown across files
    hooks: Scheduler,
    events: EventSender,
    /// Parent of every file's token
    cancel: CancellationToken,
}

/// Dispatch a relayed event; events for unknown scopes are dropped
fn relay(dispatcher: &mut Dispatcher, event: Event) {
    let kind = event.kind();
    if let Err(err) = dispatcher.dispatch(event) {
        warn!(event = %kind, "dropping relayed event: {err}");
    }
}

/// Everything one scheduled file needs
struct FileTask {
    runner: Arc<dyn Runner>,
    options: RunOptions,
    hooks: Scheduler,
    file: Arc<DiscoveredFile>,
    events: EventSender,
    cancel: CancellationToken,
}

impl FileTask {
    async fn run(self) -> anyhow::Result<()> {
        let FileTask {
            runner,
            options,
            hooks,
            file,
            events,
            cancel,
        } = self;
        let timeout = options.execute.timeout;

        if let Some(setup) = &options.hooks.setup {
            if let Err(err) = run_hook(&hooks, setup, &file, timeout, &cancel).await {
                let err = TestError::new(ErrorKind::Setup, format!("setup_file failed: {err}"));
                FileProgress::new(&file, &events).fail_remaining(err.clone());
                anyhow::bail!("{}: {err}", file.scope);
            }
        }

        // closedFile is held back so a teardown failure can be attached to it.
        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel();
        let execution = runner.execute_file(file.clone(), options.execute, inner_tx, cancel.clone());
        let forward = async {
            let mut closed = None;
            while let Some(event) = inner_rx.recv().await {
                match event {
                    Event::ClosedFile { .. } => closed = Some(event),
                    event => {
                        let _ = events.send(event);
                    }
                }
            }
            closed
        };
        let (executed, closed) = tokio::join!(execution, forward);

        let teardown = match &options.hooks.teardown {
            Some(teardown) => run_hook(&hooks, teardown, &file, timeout, &cancel).await.err(),
            None => None,
        };

        if let Some(Event::ClosedFile { scope, err }) = closed {
            let err = match &teardown {
                Some(failure) => {
                    warn!(file = %scope, "teardown_file failed: {failure}");
                    Some(TestError::new(
                        ErrorKind::Teardown,
                        format!("teardown_file failed: {failure}"),
                    ))
                }
                None => err,
            };
            let _ = events.send(Event::ClosedFile { scope, err });
        }

        executed?;
        if let Some(failure) = teardown {
            anyhow::bail!("{}: teardown_file failed: {failure}", file.scope);
        }
        Ok(())
    }
}

/// Run a hook through the serial scheduler under the run's timeout.
///
/// The timer starts once the hook is admitted; time spent queued behind other
/// files' hooks does not count against it.
async fn run_hook(
    scheduler: &Scheduler,
    hook: &CommandBody,
    file: &DiscoveredFile,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), SchedulerError> {
    let mut hook = hook.clone();
    hook.env
        .insert("TESTHIVE_FILE".to_string(), file.path.display().to_string());

    let ctx = TestContext {
        scope: file.scope.clone(),
        file: file.path.clone(),
        cancel: cancel.child_token(),
    };

    scheduler
        .enqueue(async move {
            let run = async { hook.run(&ctx).await.map_err(SchedulerError::Task) };
            with_timeout_cancelling(run, timeout, &ctx.cancel).await?;
            Ok::<_, anyhow::Error>(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DeclaredTest, SuiteDiscovery};
    use crate::dispatch::ReporterCtx;
    use crate::executor::{MainRunner, SubprocessRunner, TestConcurrency, WorkerRunner};
    use crate::models::{Scope, State, Status};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    enum Body {
        Pass,
        Fail,
        Panic,
        Sleep(u64),
        Track(Arc<Gauge>),
    }

    #[derive(Debug, Default)]
    struct Gauge {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl TestBody for Body {
        fn run<'a>(&'a self, _ctx: &'a TestContext) -> BoxFuture<'a, anyhow::Result<()>> {
            async move {
                match self {
                    Body::Pass => Ok(()),
                    Body::Fail => anyhow::bail!("expected 2, got 3"),
                    Body::Panic => panic!("index out of bounds"),
                    Body::Sleep(ms) => {
                        tokio::time::sleep(Duration::from_millis(*ms)).await;
                        Ok(())
                    }
                    Body::Track(gauge) => {
                        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
                        gauge.max.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        gauge.current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
            .boxed()
        }
    }

    /// Files keyed by root path
    #[derive(Default)]
    struct MemoryDiscovery(HashMap<PathBuf, Vec<DiscoveredFile>>);

    impl MemoryDiscovery {
        fn with(mut self, root: &str, file: DiscoveredFile) -> Self {
            self.0.entry(PathBuf::from(root)).or_default().push(file);
            self
        }
    }

    impl Discovery for MemoryDiscovery {
        fn discover(&self, root: &Path) -> Result<Vec<DiscoveredFile>, DiscoveryError> {
            self.0
                .get(root)
                .cloned()
                .ok_or_else(|| DiscoveryError::NotFound(root.to_path_buf()))
        }

        fn is_test_file(&self, _path: &Path) -> bool {
            true
        }
    }

    fn test(path: &[&str], body: Body) -> DeclaredTest {
        DeclaredTest::new(
            Scope::from_names(path.iter().copied()),
            Some(Arc::new(body) as Arc<dyn TestBody>),
        )
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct Recorder(Log);

    impl Reporter for Recorder {
        fn on_event(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(ctx.event.clone());
            Ok(())
        }
    }

    fn scenario() -> MemoryDiscovery {
        MemoryDiscovery::default()
            .with(
                "suite",
                DiscoveredFile::new("a", "A")
                    .with_test(test(&["A", "t1"], Body::Pass))
                    .with_test(test(&["A", "t2"], Body::Fail)),
            )
            .with(
                "suite",
                DiscoveredFile::new("b", "B").with_test(test(&["B", "t3"], Body::Pass).skipped(None)),
            )
    }

    fn orchestrator(discovery: MemoryDiscovery, runner: Arc<dyn Runner>, options: RunOptions) -> Orchestrator {
        Orchestrator::new(Arc::new(discovery), runner, options)
    }

    fn status_of(tree: &StateTree, path: &[&str]) -> Option<Status> {
        let id = tree.lookup(&Scope::from_names(path.iter().copied())).unwrap();
        tree.node(id).status()
    }

    #[tokio::test]
    async fn test_rollup_scenario() {
        for runner in [Arc::new(MainRunner) as Arc<dyn Runner>, Arc::new(WorkerRunner)] {
            let orchestrator = orchestrator(
                scenario(),
                runner,
                RunOptions {
                    concurrency: 2,
                    ..RunOptions::default()
                },
            );
            let summary = orchestrator
                .run(&[PathBuf::from("suite")], Vec::new(), CancellationToken::new())
                .await
                .unwrap();

            let tree = &summary.tree;
            assert_eq!(tree.root().status(), Some(Status::Fail));
            assert_eq!(tree.root().state(), State::Finished);
            assert_eq!(status_of(tree, &["A"]), Some(Status::Fail));
            assert_eq!(status_of(tree, &["A", "t1"]), Some(Status::Pass));
            assert_eq!(status_of(tree, &["B"]), Some(Status::Skipped));
            assert_eq!(summary.files, 2);
            assert_eq!(summary.unit_errors, 0);
        }
    }

    #[tokio::test]
    async fn test_reporters_see_ordered_lifecycle() {
        let log: Log = Arc::default();
        let orchestrator = orchestrator(scenario(), Arc::new(MainRunner), RunOptions::default());
        orchestrator
            .run(
                &[PathBuf::from("suite")],
                vec![Box::new(Recorder(log.clone()))],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = log.lock().unwrap();
        assert_eq!(events.first().unwrap().kind().name(), "addedFile");
        assert_eq!(*events.last().unwrap(), Event::FinishedAllTests);

        let position = |wanted: &Event| events.iter().position(|e| e == wanted).unwrap();
        let t2 = Scope::from_names(["A", "t2"]);
        let added = position(&Event::AddedTest { scope: t2.clone() });
        let started = position(&Event::StartedTest { scope: t2.clone() });
        let closed = position(&Event::ClosedFile {
            scope: Scope::file("A"),
            err: None,
        });
        assert!(added < started);
        assert!(started < closed);
        // added/opened/closed per file, added/started/finished per test
        assert_eq!(events.len(), 2 * 3 + 3 * 3 + 1);
    }

    #[tokio::test]
    async fn test_concurrency_bounds_files() {
        let gauge = Arc::new(Gauge::default());
        let mut discovery = MemoryDiscovery::default();
        for i in 0..6 {
            let name = format!("f{i}");
            discovery = discovery.with(
                "many",
                DiscoveredFile::new(&name, name.as_str())
                    .with_test(test(&[name.as_str(), "t"], Body::Track(gauge.clone()))),
            );
        }

        let orchestrator = orchestrator(
            discovery,
            Arc::new(MainRunner),
            RunOptions {
                concurrency: 2,
                ..RunOptions::default()
            },
        );
        let summary = orchestrator
            .run(&[PathBuf::from("many")], Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gauge.max.load(Ordering::SeqCst), 2);
        assert_eq!(summary.tree.root().status(), Some(Status::Pass));
        assert_eq!(summary.files, 6);
    }

    #[tokio::test]
    async fn test_panicking_test_is_isolated() {
        let discovery = MemoryDiscovery::default().with(
            "p",
            DiscoveredFile::new("p", "P")
                .with_test(test(&["P", "explodes"], Body::Panic))
                .with_test(test(&["P", "after"], Body::Pass)),
        );
        let orchestrator = orchestrator(discovery, Arc::new(MainRunner), RunOptions::default());
        let summary = orchestrator
            .run(&[PathBuf::from("p")], Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        let tree = &summary.tree;
        assert_eq!(status_of(tree, &["P", "explodes"]), Some(Status::Fail));
        assert_eq!(status_of(tree, &["P", "after"]), Some(Status::Pass));
        let id = tree.lookup(&Scope::from_names(["P", "explodes"])).unwrap();
        assert_eq!(tree.node(id).err().unwrap().kind, ErrorKind::Panic);
    }

    #[tokio::test]
    async fn test_cancel_finishes_run() {
        for runner in [Arc::new(MainRunner) as Arc<dyn Runner>, Arc::new(WorkerRunner)] {
            let discovery = MemoryDiscovery::default().with(
                "slow",
                DiscoveredFile::new("s", "S")
                    .with_test(test(&["S", "sleeps"], Body::Sleep(10_000)))
                    .with_test(test(&["S", "never"], Body::Pass)),
            );
            let orchestrator = orchestrator(
                discovery,
                runner,
                RunOptions {
                    execute: ExecuteOptions {
                        timeout: Duration::from_secs(30),
                        test_concurrency: TestConcurrency::Serial,
                    },
                    ..RunOptions::default()
                },
            );

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let start = Instant::now();
            let summary = orchestrator
                .run(&[PathBuf::from("slow")], Vec::new(), cancel)
                .await
                .unwrap();

            assert!(start.elapsed() < Duration::from_secs(5));
            assert_eq!(summary.tree.root().status(), Some(Status::Fail));
            assert_eq!(summary.tree.root().state(), State::Finished);
            assert_eq!(summary.unit_errors, 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_relayed_scope_is_dropped() {
        // A child that reports a test discovery never declared
        let script = r#"
echo '{"event":"openedFile","scope":["X"]}'
echo '{"event":"startedTest","scope":["X","ghost"]}'
echo '{"event":"startedTest","scope":["X","t"]}'
echo '{"event":"finishedTest","scope":["X","t"]}'
echo '{"event":"closedFile","scope":["X"]}'
"#;
        let runner = SubprocessRunner::with_command(
            "sh",
            vec!["-c".to_string(), script.to_string(), "sh".to_string()],
        );
        let discovery = MemoryDiscovery::default().with(
            "x",
            DiscoveredFile::new("x", "X").with_test(DeclaredTest::new(Scope::from_names(["X", "t"]), None)),
        );
        let orchestrator = orchestrator(discovery, Arc::new(runner), RunOptions::default());
        let summary = orchestrator
            .run(&[PathBuf::from("x")], Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.tree.root().status(), Some(Status::Pass));
        assert!(summary
            .tree
            .lookup(&Scope::from_names(["X", "ghost"]))
            .is_err());
    }

    #[tokio::test]
    async fn test_discovery_error_is_fatal() {
        let orchestrator = orchestrator(MemoryDiscovery::default(), Arc::new(MainRunner), RunOptions::default());
        let result = orchestrator
            .run(&[PathBuf::from("missing")], Vec::new(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(OrchestratorError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_fatal_error_settles_scheduled_files() {
        let gauge = Arc::new(Gauge::default());
        let discovery = MemoryDiscovery::default().with(
            "ok",
            DiscoveredFile::new("a", "A").with_test(test(&["A", "t"], Body::Track(gauge.clone()))),
        );
        let orchestrator = orchestrator(discovery, Arc::new(MainRunner), RunOptions::default());

        let result = orchestrator
            .run(
                &[PathBuf::from("ok"), PathBuf::from("missing")],
                Vec::new(),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::Discovery(_))));

        // Nothing scheduled before the failure is still running or starts later.
        assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
        let ran = gauge.max.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gauge.max.load(Ordering::SeqCst), ran);
        assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_setup_failure_fails_file_tests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.test.yaml"),
            "tests:\n  - name: one\n    run: \"true\"\n  - name: two\n    run: \"true\"\n",
        )
        .unwrap();

        let options = RunOptions {
            hooks: FileHooks {
                setup: Some(CommandBody::parse("sh -c 'exit 4'").unwrap()),
                teardown: None,
            },
            ..RunOptions::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(SuiteDiscovery::default()),
            Arc::new(MainRunner),
            options,
        );
        let summary = orchestrator
            .run(&[dir.path().to_path_buf()], Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        let tree = &summary.tree;
        assert_eq!(tree.root().status(), Some(Status::Fail));
        let file = tree.root().children().next().unwrap();
        for test in file.children() {
            assert_eq!(test.own_status(), Some(Status::Fail));
            assert_eq!(test.err().unwrap().kind, ErrorKind::Setup);
        }
        assert_eq!(summary.unit_errors, 1);
    }

    #[tokio::test]
    async fn test_queued_setup_not_charged_for_wait() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(
                dir.path().join(format!("{name}.test.yaml")),
                "tests:\n  - name: one\n    run: \"true\"\n",
            )
            .unwrap();
        }

        let options = RunOptions {
            concurrency: 3,
            execute: ExecuteOptions {
                timeout: Duration::from_millis(500),
                test_concurrency: TestConcurrency::Serial,
            },
            hooks: FileHooks {
                setup: Some(CommandBody::parse("sleep 0.3").unwrap()),
                teardown: None,
            },
            ..RunOptions::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(SuiteDiscovery::default()),
            Arc::new(MainRunner),
            options,
        );
        let summary = orchestrator
            .run(&[dir.path().to_path_buf()], Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.unit_errors, 0);
        assert_eq!(summary.tree.root().status(), Some(Status::Pass));
    }

    #[tokio::test]
    async fn test_teardown_failure_reported_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("torn-down");
        std::fs::write(
            dir.path().join("a.test.yaml"),
            "tests:\n  - name: one\n    run: \"true\"\n",
        )
        .unwrap();

        let teardown = format!("sh -c 'echo \"$TESTHIVE_FILE\" > {}; exit 1'", marker.display());
        let options = RunOptions {
            hooks: FileHooks {
                setup: Some(CommandBody::parse("true").unwrap()),
                teardown: Some(CommandBody::parse(&teardown).unwrap()),
            },
            ..RunOptions::default()
        };
        let log: Log = Arc::default();
        let orchestrator = Orchestrator::new(
            Arc::new(SuiteDiscovery::default()),
            Arc::new(MainRunner),
            options,
        );
        let summary = orchestrator
            .run(
                &[dir.path().to_path_buf()],
                vec![Box::new(Recorder(log.clone()))],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.tree.root().status(), Some(Status::Pass));
        assert!(std::fs::read_to_string(&marker)
            .unwrap()
            .contains("a.test.yaml"));

        let events = log.lock().unwrap();
        let closed = events
            .iter()
            .find(|e| matches!(e, Event::ClosedFile { .. }))
            .unwrap();
        let err = closed.err().unwrap();
        assert_eq!(err.kind, ErrorKind::Teardown);
        assert!(err.message.contains("teardown_file failed"));
    }

    #[tokio::test]
    async fn test_duplicate_roots_run_once() {
        let discovery = MemoryDiscovery::default()
            .with("r", DiscoveredFile::new("a", "A").with_test(test(&["A", "t"], Body::Pass)));
        let orchestrator = orchestrator(discovery, Arc::new(MainRunner), RunOptions::default());
        let summary = orchestrator
            .run(
                &[PathBuf::from("r"), PathBuf::from("r")],
                Vec::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.files, 1);
    }
}
