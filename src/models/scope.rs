//! Scope paths
//!
//! A scope is the ordered list of names from the root to a file, suite or test.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered path of names identifying a node. Level 1 is a file.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Scope(Vec<String>);

impl Scope {
    /// The empty scope, addressing the root
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Scope of a file node
    pub fn file(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Child scope: `self + [name]`
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut names = self.0.clone();
        names.push(name.into());
        Self(names)
    }

    /// Scope without its last name, `None` for the root
    pub fn parent(&self) -> Option<Scope> {
        match self.0.split_last() {
            Some((_, rest)) => Some(Self(rest.to_vec())),
            None => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Nesting level; 1 for files
    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Name of the file this scope belongs to
    pub fn file_name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// True when `self` is a direct child of `parent`
    pub fn is_child_of(&self, parent: &Scope) -> bool {
        self.0.len() == parent.0.len() + 1 && self.0.starts_with(&parent.0)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" › "))
    }
}

impl<S: Into<String>> FromIterator<S> for Scope {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::from_names(iter)
    }
}
