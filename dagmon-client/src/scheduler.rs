//! Batch scheduler query interface

use async_trait::async_trait;

use crate::error::SchedulerError;
use dagmon_core::domain::RootTaskRecord;

/// Query interface to the batch scheduler.
///
/// One implementation talks to the real scheduler; tests substitute a canned
/// implementation. The scheduler may be down at any time, which callers must
/// treat as a retriable condition, not a fault.
#[async_trait]
pub trait SchedulerQuery: Send + Sync {
    /// Fetch the root DAG records for a task, newest last.
    ///
    /// An empty vector means the scheduler answered but holds no matching
    /// root record.
    async fn root_tasks(&self, task_name: &str) -> Result<Vec<RootTaskRecord>, SchedulerError>;
}
