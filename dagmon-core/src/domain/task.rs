//! Task-level records and the produced status document

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::node::{NodeRunHistory, NodeState};

/// User-facing task status labels.
///
/// The persisted task status is an open string (pre-scheduler statuses pass
/// through the aggregator verbatim), so these are constants rather than a
/// closed enum.
pub mod status {
    pub const SUBMITTED: &str = "SUBMITTED";
    pub const KILLED: &str = "KILLED";
    pub const KILLFAILED: &str = "KILLFAILED";
    pub const FAILED: &str = "FAILED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const IN_TRANSITION: &str = "InTransition";
    pub const UNKNOWN: &str = "UNKNOWN";
    /// The DAG controller is running but no payload jobs exist yet.
    pub const RUNNING_NOT_SUBMITTED: &str = "Running (jobs not submitted)";
}

/// Read-only persisted task row, as handed to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task name.
    pub name: String,
    /// Persisted lifecycle status string.
    pub status: String,
    /// Failure message recorded before the task reached the scheduler.
    pub failure: Option<String>,
}

/// Root DAG record returned by the batch scheduler query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootTaskRecord {
    /// Scheduler job-status code (1..5: idle, running, killing, finished, held).
    pub job_status: i64,
    /// Declared number of jobs in the task.
    #[serde(default)]
    pub job_count: u32,
    /// Hold-reason code, meaningful when `job_status` is 5.
    #[serde(default)]
    pub hold_reason_code: Option<i64>,
    #[serde(default)]
    pub hold_reason: Option<String>,
    /// User-facing working-directory URL; absent until the DAG bootstraps.
    #[serde(default)]
    pub user_web_dir: Option<String>,
    #[serde(default)]
    pub site_whitelist: Vec<String>,
    #[serde(default)]
    pub site_blacklist: Vec<String>,
    /// Resubmission-specific whitelist additions, unioned in by the filter.
    #[serde(default)]
    pub site_resubmit_whitelist: Vec<String>,
    #[serde(default)]
    pub site_resubmit_blacklist: Vec<String>,
}

/// The task status document produced by one status query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    pub task_failure_msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_warning_msg: Option<String>,
    pub job_set_id: String,
    /// Job count per node state.
    pub jobs_per_status: BTreeMap<NodeState, u32>,
    /// Ordered `(state, node id)` list over every node of the task.
    pub job_list: Vec<(NodeState, u32)>,
    /// Full per-node run histories, for diagnostic display.
    pub jobs: BTreeMap<u32, NodeRunHistory>,
    /// Raw pool diagnostic payload, opaque to this core.
    pub pool: serde_json::Value,
}

impl TaskStatus {
    /// An empty document carrying only a status label.
    pub fn bare(status: impl Into<String>) -> Self {
        TaskStatus {
            status: status.into(),
            ..TaskStatus::default()
        }
    }

    /// An empty document carrying a status label and a failure message.
    pub fn with_failure(status: impl Into<String>, failure: impl Into<String>) -> Self {
        TaskStatus {
            status: status.into(),
            task_failure_msg: failure.into(),
            ..TaskStatus::default()
        }
    }

    /// The `UNKNOWN` document used for every input-unavailable condition.
    pub fn unknown(failure: impl Into<String>) -> Self {
        Self::with_failure(status::UNKNOWN, failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_document_is_empty_apart_from_message() {
        let doc = TaskStatus::unknown("scheduler is down");
        assert_eq!(doc.status, status::UNKNOWN);
        assert_eq!(doc.task_failure_msg, "scheduler is down");
        assert!(doc.jobs_per_status.is_empty());
        assert!(doc.job_list.is_empty());
    }

    #[test]
    fn test_root_record_defaults_optional_fields() {
        let root: RootTaskRecord = serde_json::from_str(r#"{"job_status": 2}"#).unwrap();
        assert_eq!(root.job_status, 2);
        assert_eq!(root.job_count, 0);
        assert!(root.user_web_dir.is_none());
        assert!(root.site_whitelist.is_empty());
    }
}
