//! Domain types shared across the dagmon crates

pub mod event;
pub mod node;
pub mod outcome;
pub mod task;

pub use event::{EventKind, JobEvent};
pub use node::{JobId, NodeRunHistory, NodeState};
pub use outcome::{Outcome, RetryDecision};
pub use task::{RootTaskRecord, TaskRecord, TaskStatus};
