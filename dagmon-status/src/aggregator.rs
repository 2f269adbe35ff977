//! Status aggregator
//!
//! Merges the task-level scheduler status code, the persisted task record,
//! and the per-node state map into one task status document. The pure merge
//! lives here; the fetch orchestration is in [`crate::service`].

use tracing::debug;

use dagmon_core::domain::task::status;
use dagmon_core::domain::{NodeRunHistory, NodeState, RootTaskRecord, TaskStatus};

use crate::event_log::NodeMap;

/// How much detail a status query should gather.
///
/// The node-status snapshot is always fetched; the event log only for
/// [`Verbosity::EventLog`], the site ad and pool info only for
/// [`Verbosity::SiteInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Summary,
    EventLog,
    SiteInfo,
}

/// Merge the scheduler's task-level view with the per-node state map.
///
/// `persisted_status` is the task's lifecycle status from the task database,
/// `root` the newest root DAG record from the scheduler, `nodes` the state
/// map built from the event log and/or status feed. The caller has already
/// handled the pre-scheduler gates (persisted status, scheduler
/// reachability, bootstrap); by this point a root record exists.
pub fn aggregate(
    persisted_status: &str,
    task_name: &str,
    root: &RootTaskRecord,
    mut nodes: NodeMap,
    pool: serde_json::Value,
) -> TaskStatus {
    let code = root.job_status;
    let label = match code {
        1 | 2 => status::SUBMITTED,
        4 => status::COMPLETED,
        5 => status::KILLED,
        _ => "unknown",
    };

    let mut doc = TaskStatus {
        status: label.to_string(),
        job_set_id: task_name.to_string(),
        pool,
        ..TaskStatus::default()
    };

    // Held root DAG: the hold reason says why. Reason 1 is an
    // operator-initiated kill whose database update may not have landed yet;
    // reason 16 is the controller restarting the DAG; anything else means the
    // DAG died.
    if persisted_status != status::KILLED && code == 5 && root.hold_reason_code == Some(1) {
        doc.status = status::KILLED.to_string();
    } else if code == 5 && root.hold_reason_code == Some(16) {
        doc.status = status::IN_TRANSITION.to_string();
    } else if persisted_status != status::KILLED && code == 5 {
        doc.status = status::FAILED.to_string();
    }

    // Nodes absent from every feed never reached the scheduler: they were
    // killed with the task, or simply not submitted yet.
    for node_id in 1..=root.job_count {
        nodes.entry(node_id).or_insert_with(|| NodeRunHistory {
            state: Some(if code == 5 {
                NodeState::Killed
            } else {
                NodeState::Unsubmitted
            }),
            ..NodeRunHistory::default()
        });
    }

    for (&node_id, info) in &nodes {
        let state = info.state.unwrap_or(NodeState::Unsubmitted);
        *doc.jobs_per_status.entry(state).or_insert(0) += 1;
        doc.job_list.push((state, node_id));
    }

    if nodes.is_empty() && code == 2 {
        // The DAG controller itself is running but no payload jobs exist yet.
        doc.status = status::RUNNING_NOT_SUBMITTED.to_string();
    }

    doc.jobs = nodes;
    debug!(
        "Aggregated status for task {}: {} ({} nodes)",
        task_name,
        doc.status,
        doc.jobs.len()
    );
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(code: i64, hold_reason: Option<i64>, job_count: u32) -> RootTaskRecord {
        RootTaskRecord {
            job_status: code,
            job_count,
            hold_reason_code: hold_reason,
            hold_reason: None,
            user_web_dir: Some("http://example.org/task".to_string()),
            site_whitelist: vec![],
            site_blacklist: vec![],
            site_resubmit_whitelist: vec![],
            site_resubmit_blacklist: vec![],
        }
    }

    fn nodes_with_states(states: &[(u32, NodeState)]) -> NodeMap {
        let mut nodes = NodeMap::new();
        for &(id, state) in states {
            nodes.entry(id).or_insert_with(NodeRunHistory::default).state = Some(state);
        }
        nodes
    }

    #[test]
    fn test_scheduler_codes_map_to_task_status() {
        for (code, expected) in [(1, "SUBMITTED"), (2, "SUBMITTED"), (4, "COMPLETED"), (3, "unknown")] {
            let doc = aggregate(
                "SUBMITTED",
                "task1",
                &root(code, None, 0),
                NodeMap::new(),
                serde_json::Value::Null,
            );
            assert_eq!(doc.status, expected, "code {}", code);
        }
    }

    #[test]
    fn test_held_with_operator_kill_reason_is_killed() {
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(5, Some(1), 0),
            NodeMap::new(),
            serde_json::Value::Null,
        );
        assert_eq!(doc.status, "KILLED");
    }

    #[test]
    fn test_held_in_transition() {
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(5, Some(16), 0),
            NodeMap::new(),
            serde_json::Value::Null,
        );
        assert_eq!(doc.status, "InTransition");
    }

    #[test]
    fn test_held_with_other_reason_is_failed() {
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(5, Some(99), 0),
            NodeMap::new(),
            serde_json::Value::Null,
        );
        assert_eq!(doc.status, "FAILED");
    }

    #[test]
    fn test_already_killed_task_stays_killed() {
        let doc = aggregate(
            "KILLED",
            "task1",
            &root(5, Some(99), 0),
            NodeMap::new(),
            serde_json::Value::Null,
        );
        assert_eq!(doc.status, "KILLED");
    }

    #[test]
    fn test_missing_nodes_are_synthesized_unsubmitted() {
        let nodes = nodes_with_states(&[(1, NodeState::Running)]);
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(2, None, 3),
            nodes,
            serde_json::Value::Null,
        );
        assert_eq!(doc.jobs_per_status[&NodeState::Running], 1);
        assert_eq!(doc.jobs_per_status[&NodeState::Unsubmitted], 2);
        assert_eq!(
            doc.job_list,
            vec![
                (NodeState::Running, 1),
                (NodeState::Unsubmitted, 2),
                (NodeState::Unsubmitted, 3),
            ]
        );
    }

    #[test]
    fn test_missing_nodes_of_held_task_are_killed() {
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(5, Some(1), 2),
            NodeMap::new(),
            serde_json::Value::Null,
        );
        assert_eq!(doc.jobs_per_status[&NodeState::Killed], 2);
    }

    #[test]
    fn test_running_with_no_jobs_gets_distinguishing_label() {
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(2, None, 0),
            NodeMap::new(),
            serde_json::Value::Null,
        );
        assert_eq!(doc.status, "Running (jobs not submitted)");
    }

    #[test]
    fn test_feed_only_nodes_without_state_count_as_unsubmitted() {
        // A node known only from the site ad has available sites but no state.
        let mut nodes = NodeMap::new();
        nodes.entry(1).or_insert_with(NodeRunHistory::default);
        let doc = aggregate(
            "SUBMITTED",
            "task1",
            &root(2, None, 0),
            nodes,
            serde_json::Value::Null,
        );
        assert_eq!(doc.jobs_per_status[&NodeState::Unsubmitted], 1);
    }
}
