//! Test discovery
//!
//! Discovery turns a root path into files with their declared tests. The core
//! only depends on the [`Discovery`] trait; [`SuiteDiscovery`] is the built-in
//! implementation reading declarative suite files.

mod command;
mod suite;

pub use command::CommandBody;
pub use suite::{SuiteDiscovery, SuiteFile, DEFAULT_SUFFIXES};

use futures::future::BoxFuture;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{Event, Scope};

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid suite file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("duplicate test name '{scope}'")]
    DuplicateName { scope: Scope },
}

/// What the body of a test sees while it runs
#[derive(Clone, Debug)]
pub struct TestContext {
    pub scope: Scope,
    pub file: PathBuf,
    /// Fires when the run is cancelled
    pub cancel: CancellationToken,
}

/// Executable body of a declared test.
///
/// `Ok` is a pass, `Err` a failure with the error captured. Panics are caught
/// by the executor and reported as failures too.
pub trait TestBody: Send + Sync + fmt::Debug {
    fn run<'a>(&'a self, ctx: &'a TestContext) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Static directive attached to a declared test
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestMode {
    Run,
    Skip { reason: Option<String> },
}

/// One declared test. Tests without a body are pure containers.
#[derive(Clone, Debug)]
pub struct DeclaredTest {
    pub scope: Scope,
    pub mode: TestMode,
    pub body: Option<Arc<dyn TestBody>>,
    /// Overrides the run-wide per-test timeout
    pub timeout: Option<Duration>,
}

impl DeclaredTest {
    pub fn new(scope: Scope, body: Option<Arc<dyn TestBody>>) -> Self {
        Self {
            scope,
            mode: TestMode::Run,
            body,
            timeout: None,
        }
    }

    pub fn skipped(mut self, reason: Option<String>) -> Self {
        self.mode = TestMode::Skip { reason };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.mode, TestMode::Skip { .. })
    }
}

/// A discovered file with its tests flattened parent-before-child
#[derive(Clone, Debug)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub scope: Scope,
    pub tests: Vec<DeclaredTest>,
}

impl DiscoveredFile {
    pub fn new(path: impl Into<PathBuf>, scope_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scope: Scope::file(scope_name),
            tests: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_test(mut self, test: DeclaredTest) -> Self {
        self.tests.push(test);
        self
    }

    /// Direct children of `parent` in declaration order
    pub fn children_of<'a>(&'a self, parent: &'a Scope) -> impl Iterator<Item = &'a DeclaredTest> + 'a {
        self.tests.iter().filter(move |t| t.scope.is_child_of(parent))
    }

    /// `addedFile` followed by one `addedTest` per declared test
    pub fn added_events(&self) -> Vec<Event> {
        std::iter::once(Event::AddedFile {
            scope: self.scope.clone(),
        })
        .chain(self.tests.iter().map(|t| Event::AddedTest {
            scope: t.scope.clone(),
        }))
        .collect()
    }
}

/// Source of declared tests
pub trait Discovery: Send + Sync {
    /// Every test file under `root`, sorted by path
    fn discover(&self, root: &Path) -> Result<Vec<DiscoveredFile>, DiscoveryError>;

    /// Whether `path` would be picked up as a test file
    fn is_test_file(&self, path: &Path) -> bool;
}
