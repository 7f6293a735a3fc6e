//! Data models shared across the execution core
//!
//! Scopes, statuses, lifecycle states and the event vocabulary.

mod event;
mod scope;
mod status;

pub use event::{Event, EventKind};
pub use scope::Scope;
pub use status::{ErrorKind, State, Status, TestError};
