//! Serializable node snapshots
//!
//! A plain value copy of a subtree: every stored and derived attribute except
//! the parent link. Reporters get an immutable view they can keep or print.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NodeRef;
use crate::models::{Scope, State, Status, TestError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub scope: Scope,
    pub level: usize,
    pub is_file: bool,
    pub own_state: State,
    pub own_status: Option<Status>,
    pub state: State,
    pub status: Option<Status>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<TestError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub(super) fn capture(node: NodeRef<'_>) -> Self {
        Self {
            name: node.name().map(str::to_string),
            scope: node.scope().clone(),
            level: node.level(),
            is_file: node.is_file(),
            own_state: node.own_state(),
            own_status: node.own_status(),
            state: node.state(),
            status: node.status(),
            started_at: node.started_at(),
            finished_at: node.finished_at(),
            duration_ms: node.duration().map(|d| d.as_millis() as u64),
            err: node.err().cloned(),
            children: node.children().map(Self::capture).collect(),
        }
    }

    /// Count leaf tests by status: (passed, failed, skipped).
    ///
    /// Groups are left out; their outcome is already counted through their leaves.
    pub fn totals(&self) -> (usize, usize, usize) {
        let mut totals = (0, 0, 0);
        self.visit(&mut |node| {
            if node.level > 1 && node.children.is_empty() {
                match node.own_status {
                    Some(Status::Pass) => totals.0 += 1,
                    Some(Status::Fail) => totals.1 += 1,
                    Some(Status::Skipped) => totals.2 += 1,
                    None => {}
                }
            }
        });
        totals
    }

    /// Visit this node and every descendant, depth first
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a NodeSnapshot)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}
