//! In-process runner
//!
//! Runs files on the orchestrator's runtime. Cheapest strategy with no
//! isolation beyond the per-test panic guard.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{execute_file, EventSender, ExecuteOptions, Runner, RunnerError, RunnerKind};
use crate::discovery::DiscoveredFile;

#[derive(Clone, Copy, Debug, Default)]
pub struct MainRunner;

impl Runner for MainRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Main
    }

    fn execute_file(
        &self,
        file: Arc<DiscoveredFile>,
        options: ExecuteOptions,
        events: EventSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), RunnerError>> {
        async move {
            execute_file(&file, &options, &events, &cancel).await;
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled {
                    file: file.path.clone(),
                });
            }
            Ok(())
        }
        .boxed()
    }
}
