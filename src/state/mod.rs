//! Hierarchical test state
//!
//! One node per scope, stored in an arena and addressed by [`NodeId`]. Parent
//! and children links are indices, so the tree has no reference cycles and
//! snapshots serialize without special casing.
//!
//! Status and state of a node are derived on read from the node and all of
//! its descendants, which keeps rollup correct no matter in which order
//! completion events arrive.

mod snapshot;

pub use snapshot::NodeSnapshot;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{ErrorKind, Scope, State, Status, TestError};

/// State tree errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot resolve scope '{scope}': ancestor '{missing}' does not exist")]
    Lookup { scope: Scope, missing: Scope },

    #[error("the root node cannot be created or addressed by an event")]
    RootScope,
}

/// Stable index of a node in the arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

/// What `finishedAllTests` does with nodes that never finished
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IncompletePolicy {
    /// Finish every unfinished test as failed before finishing the root
    #[default]
    Fail,
    /// Only mark the root finished; unfinished descendants keep their state
    Ignore,
}

/// Status and error copied into a node when it finishes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinishPayload {
    pub status: Option<Status>,
    pub err: Option<TestError>,
}

impl FinishPayload {
    pub fn new(status: Status, err: Option<TestError>) -> Self {
        Self {
            status: Some(status),
            err,
        }
    }
}

#[derive(Clone, Debug)]
struct StateNode {
    name: Option<String>,
    scope: Scope,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    own_state: State,
    own_status: Option<Status>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    err: Option<TestError>,
}

impl StateNode {
    fn new(name: Option<String>, scope: Scope, parent: Option<NodeId>) -> Self {
        Self {
            name,
            scope,
            parent,
            children: BTreeMap::new(),
            own_state: State::Pending,
            own_status: None,
            started_at: None,
            finished_at: None,
            err: None,
        }
    }
}

/// Arena of state nodes rooted at [`NodeId::ROOT`]
#[derive(Clone, Debug)]
pub struct StateTree {
    nodes: Vec<StateNode>,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![StateNode::new(None, Scope::root(), None)],
        }
    }

    pub fn root(&self) -> NodeRef<'_> {
        self.node(NodeId::ROOT)
    }

    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Resolve a scope by walking children maps from the root
    pub fn lookup(&self, scope: &Scope) -> Result<NodeId, StateError> {
        let mut current = NodeId::ROOT;
        for (depth, name) in scope.names().iter().enumerate() {
            current = match self.nodes[current.0].children.get(name) {
                Some(id) => *id,
                None => {
                    return Err(StateError::Lookup {
                        scope: scope.clone(),
                        missing: Scope::from_names(scope.names()[..=depth].iter().cloned()),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Create the node for `scope` under its already existing parent.
    ///
    /// Creating a scope that already exists returns the existing node.
    pub fn create(&mut self, scope: &Scope) -> Result<NodeId, StateError> {
        let Some(parent_scope) = scope.parent() else {
            return Err(StateError::RootScope);
        };
        let parent = self.lookup(&parent_scope)?;
        let name = scope.name().unwrap_or_default().to_string();

        if let Some(existing) = self.nodes[parent.0].children.get(&name) {
            return Ok(*existing);
        }

        let id = NodeId(self.nodes.len());
        self.nodes
            .push(StateNode::new(Some(name.clone()), scope.clone(), Some(parent)));
        self.nodes[parent.0].children.insert(name, id);
        debug!(scope = %scope, "created state node");
        Ok(id)
    }

    /// Mark a node started. Calling it again overwrites the timestamp.
    pub fn started(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.own_state = State::Started;
        node.started_at = Some(Utc::now());
    }

    /// Mark a node finished, copying status and error only when a payload is given
    pub fn finished(&mut self, id: NodeId, payload: Option<FinishPayload>) {
        let node = &mut self.nodes[id.0];
        node.own_state = State::Finished;
        node.finished_at = Some(Utc::now());

        if let Some(payload) = payload {
            node.own_status = payload.status;
            node.err = payload.err;
        }
    }

    /// Finish the root at the end of a run.
    ///
    /// Returns the scopes of tests that were force-failed under
    /// [`IncompletePolicy::Fail`].
    pub fn finish_all(&mut self, policy: IncompletePolicy) -> Vec<Scope> {
        let mut failed = Vec::new();

        if policy == IncompletePolicy::Fail {
            let unfinished: Vec<NodeId> = self
                .descendants(NodeId::ROOT)
                .into_iter()
                .filter(|id| self.nodes[id.0].own_state != State::Finished)
                .collect();

            for id in unfinished {
                if self.nodes[id.0].started_at.is_none() {
                    self.started(id);
                }
                if self.nodes[id.0].scope.level() > 1 {
                    let err = TestError::new(
                        ErrorKind::Incomplete,
                        "test did not finish before the run ended",
                    );
                    self.finished(id, Some(FinishPayload::new(Status::Fail, Some(err))));
                    failed.push(self.nodes[id.0].scope.clone());
                } else {
                    self.finished(id, None);
                }
            }
        }

        let root = &mut self.nodes[NodeId::ROOT.0];
        root.own_state = State::Finished;
        root.finished_at = Some(Utc::now());
        failed
    }

    /// Mark the root started, used when a run begins
    pub fn start_root(&mut self) {
        self.started(NodeId::ROOT);
    }

    /// All strict descendants of `id`, depth first
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id.0].children.values().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.values().rev().copied());
        }
        out
    }
}

/// Borrowed view of one node with its derived attributes
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a StateTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    fn inner(&self) -> &'a StateNode {
        &self.tree.nodes[self.id.0]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// `None` for the root
    pub fn name(&self) -> Option<&'a str> {
        self.inner().name.as_deref()
    }

    pub fn scope(&self) -> &'a Scope {
        &self.inner().scope
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.inner().parent.map(|id| self.tree.node(id))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        self.inner().children.values().map(move |id| tree.node(*id))
    }

    pub fn child(&self, name: &str) -> Option<NodeRef<'a>> {
        self.inner().children.get(name).map(|id| self.tree.node(*id))
    }

    pub fn own_state(&self) -> State {
        self.inner().own_state
    }

    pub fn own_status(&self) -> Option<Status> {
        self.inner().own_status
    }

    pub fn err(&self) -> Option<&'a TestError> {
        self.inner().err.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner().finished_at
    }

    pub fn level(&self) -> usize {
        self.scope().level()
    }

    pub fn is_file(&self) -> bool {
        self.level() == 1
    }

    /// `finished_at - started_at`, when both are recorded
    pub fn duration(&self) -> Option<Duration> {
        let node = self.inner();
        match (node.started_at, node.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// Own status and every descendant's own status
    fn statuses(&self) -> impl Iterator<Item = Status> + 'a {
        let tree = self.tree;
        self.inner().own_status.into_iter().chain(
            tree.descendants(self.id)
                .into_iter()
                .filter_map(move |id| tree.nodes[id.0].own_status),
        )
    }

    /// Highest-priority status in the subtree: fail > pass > skipped
    pub fn status(&self) -> Option<Status> {
        Status::rollup(self.statuses())
    }

    /// The shared state when self and every descendant agree, otherwise started
    pub fn state(&self) -> State {
        let own = self.own_state();
        let agree = self
            .tree
            .descendants(self.id)
            .into_iter()
            .all(|id| self.tree.nodes[id.0].own_state == own);
        if agree {
            own
        } else {
            State::Started
        }
    }

    /// Immutable, serializable copy of this subtree
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::capture(*self)
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("scope", self.scope())
            .field("state", &self.state())
            .field("status", &self.status())
            .finish()
    }
}
