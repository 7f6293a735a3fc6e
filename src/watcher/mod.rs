//! Watch mode
//!
//! Runs once, then re-runs on file changes under the roots. Changes are batched
//! over a debounce window; a batch touching only suite files re-runs just those
//! files, anything else re-runs every root.

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discovery::Discovery;
use crate::dispatch::Reporter;
use crate::orchestrator::Orchestrator;

pub struct Watcher {
    orchestrator: Orchestrator,
    roots: Vec<PathBuf>,
    debounce: Duration,
}

impl Watcher {
    pub fn new(orchestrator: Orchestrator, roots: Vec<PathBuf>, debounce: Duration) -> Self {
        Self {
            orchestrator,
            roots,
            debounce,
        }
    }

    /// Watch until `shutdown` fires.
    ///
    /// `reporters` builds the reporters of each run from that run's token;
    /// every run gets a fresh state tree.
    pub async fn watch<F>(&self, mut reporters: F, shutdown: CancellationToken) -> anyhow::Result<()>
    where
        F: FnMut(&CancellationToken) -> Vec<Box<dyn Reporter>>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotifyEvent>();
        let mut watcher = notify::recommended_watcher(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            },
        )?;
        self.watch_roots(&mut watcher)?;

        self.run(&self.roots, &mut reporters, &shutdown).await;

        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut changed = BTreeSet::new();
            collect(&mut changed, first);

            let deadline = Instant::now() + self.debounce;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep_until(deadline) => break,
                    Some(event) = rx.recv() => collect(&mut changed, event),
                }
            }
            if changed.is_empty() {
                continue;
            }

            let changed: Vec<PathBuf> = changed.into_iter().collect();
            let targets = plan_rerun(&changed, &self.roots, self.orchestrator.discovery().as_ref());
            info!(changed = changed.len(), targets = targets.len(), "change detected, re-running");
            self.run(&targets, &mut reporters, &shutdown).await;
        }

        info!("watcher stopped");
        Ok(())
    }

    fn watch_roots(&self, watcher: &mut RecommendedWatcher) -> anyhow::Result<()> {
        for root in &self.roots {
            let path = root.canonicalize().unwrap_or_else(|_| root.clone());
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(&path, mode)?;
            info!(path = %path.display(), "watching");
        }
        Ok(())
    }

    async fn run<F>(&self, paths: &[PathBuf], reporters: &mut F, shutdown: &CancellationToken)
    where
        F: FnMut(&CancellationToken) -> Vec<Box<dyn Reporter>>,
    {
        let cancel = shutdown.child_token();
        match self.orchestrator.run(paths, reporters(&cancel), cancel).await {
            Ok(summary) => info!(
                status = ?summary.tree.root().status(),
                files = summary.files,
                "run finished"
            ),
            // A half-saved suite file must not stop the watcher.
            Err(e) => error!(error = %e, "run failed"),
        }
    }
}

/// Keep the paths of events that change content
fn collect(changed: &mut BTreeSet<PathBuf>, event: NotifyEvent) {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }
    debug!(kind = ?event.kind, paths = ?event.paths, "file event");
    changed.extend(event.paths);
}

/// Paths for the next run.
///
/// Only existing suite files under a root are re-run on their own, addressed
/// the way the root was given so their scopes match a full run. Any other
/// change re-runs every root.
pub fn plan_rerun(changed: &[PathBuf], roots: &[PathBuf], discovery: &dyn Discovery) -> Vec<PathBuf> {
    if changed.is_empty() {
        return Vec::new();
    }

    let mut targets = BTreeSet::new();
    for path in changed {
        if !path.is_file() || !discovery.is_test_file(path) {
            return roots.to_vec();
        }
        match roots.iter().find_map(|root| rebase(path, root)) {
            Some(target) => {
                targets.insert(target);
            }
            None => return roots.to_vec(),
        }
    }
    targets.into_iter().collect()
}

/// `path` expressed relative to the form `root` was given in
fn rebase(path: &Path, root: &Path) -> Option<PathBuf> {
    let canonical = root.canonicalize().ok()?;
    let path = path.canonicalize().ok()?;
    if path == canonical {
        return Some(root.to_path_buf());
    }
    let relative = path.strip_prefix(&canonical).ok()?;
    Some(root.join(relative))
}
