//! Reporter contract

use crate::models::{Event, EventKind, Scope, Status, TestError};
use crate::state::NodeRef;

/// Context handed to reporters, enriched with state tree views.
///
/// The state mutation for the event has already happened when a reporter sees it.
#[derive(Clone, Copy, Debug)]
pub struct ReporterCtx<'a> {
    pub event: &'a Event,
    pub root: NodeRef<'a>,
    /// The event's own node; `None` for `finishedAllTests`
    pub node: Option<NodeRef<'a>>,
}

impl<'a> ReporterCtx<'a> {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn scope(&self) -> Option<&'a Scope> {
        self.event.scope()
    }

    pub fn status(&self) -> Option<Status> {
        self.event.status()
    }

    pub fn err(&self) -> Option<&'a TestError> {
        self.event.err()
    }
}

/// Observer of lifecycle events.
///
/// Every handler defaults to [`Reporter::on_event`], which itself does nothing,
/// so a reporter implements only the handlers it cares about and may use
/// `on_event` as a catch-all.
pub trait Reporter: Send {
    fn name(&self) -> &str {
        "reporter"
    }

    fn added_file(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    fn opened_file(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    fn closed_file(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    fn added_test(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    fn started_test(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    fn finished_test(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    fn finished_all_tests(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.on_event(ctx)
    }

    /// Fallback for every event kind without a dedicated handler
    fn on_event(&mut self, _ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}
