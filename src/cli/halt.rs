//! Halt-on-errors policy
//!
//! Cancels the run token at the first failing test. Tests torn down by the
//! cancellation fail too, but only the first failure is logged.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dispatch::{Reporter, ReporterCtx};

pub struct HaltOnErrors {
    cancel: CancellationToken,
}

impl HaltOnErrors {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl Reporter for HaltOnErrors {
    fn name(&self) -> &str {
        "halt-on-errors"
    }

    fn finished_test(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        let failed = ctx.status().is_some_and(|s| s.is_failure());
        if failed && !self.cancel.is_cancelled() {
            if let Some(scope) = ctx.scope() {
                warn!(scope = %scope, "test failed, halting run");
            }
            self.cancel.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::models::{Event, Scope, Status};

    #[test]
    fn test_cancels_on_first_failure() {
        let cancel = CancellationToken::new();
        let mut dispatcher = Dispatcher::new(vec![Box::new(HaltOnErrors::new(cancel.clone()))]);

        let file = Scope::file("f");
        let ok = file.child("ok");
        let bad = file.child("bad");
        for event in [
            Event::AddedFile { scope: file.clone() },
            Event::AddedTest { scope: ok.clone() },
            Event::AddedTest { scope: bad.clone() },
            Event::OpenedFile { scope: file.clone() },
            Event::StartedTest { scope: ok.clone() },
            Event::finished(ok, Status::Pass, None),
        ] {
            dispatcher.dispatch(event).unwrap();
        }
        assert!(!cancel.is_cancelled());

        dispatcher.dispatch(Event::StartedTest { scope: bad.clone() }).unwrap();
        dispatcher.dispatch(Event::finished(bad, Status::Fail, None)).unwrap();
        assert!(cancel.is_cancelled());
    }
}
