//! Per-node lifecycle state and run history

use serde::{Deserialize, Serialize};

/// Sentinel timestamp recorded when an attempt never reached the slot it
/// would normally timestamp (e.g. a restart slot has no fresh submission,
/// an aborted idle job never started).
pub const NO_TIMESTAMP: i64 = -1;

/// Lifecycle state of one DAG node.
///
/// This is the single state vocabulary shared by the event log fold and the
/// node-status feed parsers; both sources must map into it and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Unsubmitted,
    Idle,
    Running,
    Transferring,
    Cooloff,
    Finished,
    Failed,
    Held,
    Killed,
}

impl NodeState {
    /// Stable lowercase label, used in the status document job breakdown.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Unsubmitted => "unsubmitted",
            NodeState::Idle => "idle",
            NodeState::Running => "running",
            NodeState::Transferring => "transferring",
            NodeState::Cooloff => "cooloff",
            NodeState::Finished => "finished",
            NodeState::Failed => "failed",
            NodeState::Held => "held",
            NodeState::Killed => "killed",
        }
    }

    /// States that count as a terminal success for downstream consumers.
    pub fn is_success(&self) -> bool {
        matches!(self, NodeState::Finished)
    }

    /// States that count as failed or failing for downstream consumers.
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeState::Held | NodeState::Failed | NodeState::Cooloff)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler job identifier: one cluster/proc pair per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: i64,
    pub proc: i64,
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

/// Structured run history for one DAG node, reconstructed from the event log
/// and overlaid by the node-status feed.
///
/// The four per-attempt lists (`wall_durations`, `resident_set_size`,
/// `total_user_cpu_history`, `total_sys_cpu_history`) grow in lock-step: every
/// new attempt appends one slot to each, and the latest slot is the one
/// updated in place as events arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRunHistory {
    /// Current state; `None` until any source has reported one.
    pub state: Option<NodeState>,
    /// Number of prior fresh submissions (submit count minus one).
    pub retries: u32,
    /// Number of re-executions without a new submission (eviction, hold).
    pub restarts: u32,
    /// Site assigned per attempt; reconciled to `wall_durations` length after
    /// event processing.
    pub site_history: Vec<String>,
    /// Sites this node may still be scheduled on, after policy filtering.
    pub available_sites: Vec<String>,
    /// Peak resident set size per attempt, in kilobytes.
    pub resident_set_size: Vec<u64>,
    pub submit_times: Vec<i64>,
    pub start_times: Vec<i64>,
    pub end_times: Vec<i64>,
    pub total_user_cpu_history: Vec<f64>,
    pub total_sys_cpu_history: Vec<f64>,
    pub wall_durations: Vec<f64>,
    /// Scheduler job identifier per attempt; restarts reuse the prior id.
    pub job_ids: Vec<JobId>,
    /// Whether a site has been recorded for the current attempt.
    #[serde(skip)]
    pub recorded_site: bool,
}

impl NodeRunHistory {
    /// Appends one zeroed slot to each of the four lock-step attempt lists.
    pub fn push_attempt_slot(&mut self) {
        self.total_user_cpu_history.push(0.0);
        self.total_sys_cpu_history.push(0.0);
        self.wall_durations.push(0.0);
        self.resident_set_size.push(0);
    }

    /// `true` once any source has set a state for this node.
    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// Sets the state only if no source has recorded one yet
    /// (first-writer-wins, used by the `submitted` feed status).
    pub fn state_default(&mut self, state: NodeState) {
        if self.state.is_none() {
            self.state = Some(state);
        }
    }
}
