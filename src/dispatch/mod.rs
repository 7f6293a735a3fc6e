//! Event dispatch
//!
//! Every event first mutates the [`StateTree`], then is enriched with the root
//! node and the event's own node, then fans out to every registered
//! [`Reporter`]. Reporter failures (errors or panics) are isolated: they are
//! logged and counted, and delivery continues with the next reporter.

mod reporter;

pub use reporter::{Reporter, ReporterCtx};

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::models::{Event, EventKind, Scope, Status, TestError};
use crate::state::{FinishPayload, IncompletePolicy, NodeId, StateError, StateTree};

/// Owns the state tree for one run and the reporters that observe it
pub struct Dispatcher {
    tree: StateTree,
    reporters: Vec<Box<dyn Reporter>>,
    failures: Vec<usize>,
    policy: IncompletePolicy,
}

impl Dispatcher {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        let failures = vec![0; reporters.len()];
        Self {
            tree: StateTree::new(),
            reporters,
            failures,
            policy: IncompletePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: IncompletePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[cfg(test)]
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Mark the root started at the beginning of a run
    pub fn begin(&mut self) {
        self.tree.start_root();
    }

    /// Number of failed deliveries per reporter, in registration order
    pub fn reporter_failures(&self) -> &[usize] {
        &self.failures
    }

    /// Tear down, handing back the tree and the reporters
    pub fn into_parts(self) -> (StateTree, Vec<Box<dyn Reporter>>) {
        (self.tree, self.reporters)
    }

    /// Apply an event to the tree and deliver it to every reporter.
    ///
    /// A lookup failure aborts the dispatch before any reporter sees the event.
    pub fn dispatch(&mut self, event: Event) -> Result<(), StateError> {
        self.apply(&event)?;

        let Self {
            tree,
            reporters,
            failures,
            ..
        } = self;

        let node = match event.scope() {
            Some(scope) => tree.lookup(scope).ok().map(|id| tree.node(id)),
            None => None,
        };
        let ctx = ReporterCtx {
            event: &event,
            root: tree.root(),
            node,
        };

        for (index, reporter) in reporters.iter_mut().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| deliver(reporter.as_mut(), &ctx)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(payload) => Some(TestError::panic(payload.as_ref()).message),
            };
            if let Some(message) = failure {
                failures[index] += 1;
                warn!(
                    reporter = reporter.name(),
                    event = %event.kind(),
                    "reporter failed: {message}"
                );
            }
        }

        Ok(())
    }

    /// The state reaction for each event kind
    fn apply(&mut self, event: &Event) -> Result<(), StateError> {
        match event {
            Event::AddedFile { scope } | Event::AddedTest { scope } => {
                self.tree.create(scope)?;
            }
            Event::OpenedFile { scope } | Event::StartedTest { scope } => {
                let id = self.resolve(scope)?;
                self.tree.started(id);
            }
            Event::FinishedTest { scope, status, err } => {
                let id = self.resolve(scope)?;
                let payload = FinishPayload {
                    status: Some(status.unwrap_or(Status::Pass)),
                    err: err.clone(),
                };
                self.tree.finished(id, Some(payload));
            }
            Event::ClosedFile { scope, .. } => {
                let id = self.resolve(scope)?;
                self.tree.finished(id, None);
            }
            Event::FinishedAllTests => {
                let failed = self.tree.finish_all(self.policy);
                if !failed.is_empty() {
                    warn!(count = failed.len(), "tests did not finish before the run ended");
                }
            }
        }
        debug!(event = %event.kind(), scope = ?event.scope(), "applied event");
        Ok(())
    }

    fn resolve(&self, scope: &Scope) -> Result<NodeId, StateError> {
        if scope.is_root() {
            return Err(StateError::RootScope);
        }
        self.tree.lookup(scope)
    }
}

/// Route an event to the reporter's handler for its kind
fn deliver(reporter: &mut dyn Reporter, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
    match ctx.event.kind() {
        EventKind::AddedFile => reporter.added_file(ctx),
        EventKind::OpenedFile => reporter.opened_file(ctx),
        EventKind::ClosedFile => reporter.closed_file(ctx),
        EventKind::AddedTest => reporter.added_test(ctx),
        EventKind::StartedTest => reporter.started_test(ctx),
        EventKind::FinishedTest => reporter.finished_test(ctx),
        EventKind::FinishedAllTests => reporter.finished_all_tests(ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::State;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records only finishedTest, with the enriched node's status
    struct Specific(Log);

    impl Reporter for Specific {
        fn finished_test(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
            let node = ctx.node.expect("finishedTest carries its node");
            self.0
                .lock()
                .unwrap()
                .push(format!("specific:{}:{:?}", node.scope(), node.status()));
            Ok(())
        }
    }

    /// Only the generic fallback
    struct Fallback(Log);

    impl Reporter for Fallback {
        fn on_event(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(format!("fallback:{}", ctx.kind()));
            Ok(())
        }
    }

    struct Failing;

    impl Reporter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn finished_test(&mut self, _ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn added_file(&mut self, _ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
            panic!("reporter bug")
        }
    }

    struct Silent;

    impl Reporter for Silent {}

    fn file_and_test(dispatcher: &mut Dispatcher) {
        dispatcher
            .dispatch(Event::AddedFile {
                scope: Scope::file("a"),
            })
            .unwrap();
        dispatcher
            .dispatch(Event::AddedTest {
                scope: Scope::from_names(["a", "t1"]),
            })
            .unwrap();
    }

    #[test]
    fn test_fan_out_with_fallback() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new(vec![
            Box::new(Specific(log.clone())),
            Box::new(Fallback(log.clone())),
            Box::new(Silent),
        ]);

        file_and_test(&mut dispatcher);
        dispatcher
            .dispatch(Event::finished(
                Scope::from_names(["a", "t1"]),
                Status::Fail,
                None,
            ))
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "fallback:addedFile",
                "fallback:addedTest",
                "specific:a › t1:Some(Fail)",
                "fallback:finishedTest",
            ]
        );
    }

    #[test]
    fn test_failing_reporter_is_isolated() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new(vec![
            Box::new(Failing),
            Box::new(Specific(log.clone())),
        ]);

        file_and_test(&mut dispatcher);
        dispatcher
            .dispatch(Event::FinishedTest {
                scope: Scope::from_names(["a", "t1"]),
                status: None,
                err: None,
            })
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["specific:a › t1:Some(Pass)"]);
        assert_eq!(dispatcher.reporter_failures(), &[2, 0]);

        let tree = dispatcher.tree();
        let t1 = tree.lookup(&Scope::from_names(["a", "t1"])).unwrap();
        assert_eq!(tree.node(t1).own_state(), State::Finished);
    }

    #[test]
    fn test_unknown_scope_is_lookup_error() {
        let log: Log = Arc::default();
        let mut dispatcher = Dispatcher::new(vec![Box::new(Fallback(log.clone()))]);

        let err = dispatcher
            .dispatch(Event::StartedTest {
                scope: Scope::from_names(["nope", "t"]),
            })
            .unwrap_err();
        assert!(matches!(err, StateError::Lookup { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_closed_file_rolls_up_without_status() {
        let mut dispatcher = Dispatcher::new(Vec::new());
        file_and_test(&mut dispatcher);
        let file = Scope::file("a");

        dispatcher
            .dispatch(Event::OpenedFile {
                scope: file.clone(),
            })
            .unwrap();
        dispatcher
            .dispatch(Event::finished(
                Scope::from_names(["a", "t1"]),
                Status::Skipped,
                None,
            ))
            .unwrap();
        dispatcher
            .dispatch(Event::ClosedFile {
                scope: file.clone(),
                err: None,
            })
            .unwrap();
        dispatcher.dispatch(Event::FinishedAllTests).unwrap();

        let tree = dispatcher.tree();
        let node = tree.node(tree.lookup(&file).unwrap());
        assert_eq!(node.own_status(), None);
        assert_eq!(node.status(), Some(Status::Skipped));
        assert_eq!(tree.root().state(), State::Finished);
    }
}
