//! Event stream state machine
//!
//! Consumes the JSON-lines job event log of one task and produces, per DAG
//! node, a structured run history: state, timing, resource usage, site
//! history, and retry/restart counts. Processing is a single forward pass;
//! each event applies a deterministic transition to the node it references,
//! and a node comes into existence on the first submit event naming it.
//!
//! A *retry* is a fresh scheduler submission (a new attempt slot plus a new
//! job id); a *restart* is re-execution without resubmission (eviction,
//! hold), which also opens a new attempt slot but reuses the prior job id and
//! records a `-1` sentinel submit time.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use dagmon_core::domain::node::NO_TIMESTAMP;
use dagmon_core::domain::{EventKind, JobEvent, JobId, NodeRunHistory, NodeState};

/// Per-node run histories, keyed by node id.
pub type NodeMap = BTreeMap<u32, NodeRunHistory>;

/// Hard faults of the event fold.
///
/// These indicate an upstream data-consistency bug (an event referencing a
/// job slot that was never submitted), worth surfacing loudly rather than
/// papering over.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event at {time} references job {job} with no prior submit event")]
    UnknownJob { job: JobId, time: i64 },

    #[error("event at {time} references node {node} with no prior submit event")]
    UnknownNode { node: u32, time: i64 },

    #[error("event at {time} closes an attempt of node {node} that never started")]
    InconsistentHistory { node: u32, time: i64 },
}

static NODE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:DAG Node: )?Job(\d+)").unwrap());
static CPU_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Usr \d+ (\d+):(\d+):(\d+), Sys \d+ (\d+):(\d+):(\d+)").unwrap());

/// Parse a complete job event log into per-node run histories.
///
/// `now` (unix seconds) anchors the duration of still-running attempts in the
/// final reconciliation pass; it is a parameter so the fold stays
/// deterministic under test.
///
/// Malformed lines and unrecognized event types are warned about and
/// skipped; they never abort the fold.
pub fn parse_job_log(input: &str, now: i64) -> Result<NodeMap, EventLogError> {
    let mut fold = EventFold::default();
    let mut count = 0usize;

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: JobEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!("Skipping malformed event record: {}", err);
                continue;
            }
        };
        count += 1;
        fold.apply(&event)?;
    }
    debug!("There were {} events in the job log", count);

    fold.reconcile(now);
    Ok(fold.nodes)
}

/// Fold state: the node map under construction plus the job-id routing table.
#[derive(Default)]
struct EventFold {
    nodes: NodeMap,
    /// Maps each scheduler job id to the node it belongs to.
    proc_map: HashMap<JobId, u32>,
}

impl EventFold {
    fn apply(&mut self, event: &JobEvent) -> Result<(), EventLogError> {
        let job = JobId {
            cluster: event.cluster,
            proc: event.proc,
        };
        match &event.kind {
            EventKind::Submit => self.on_submit(event, job),
            EventKind::Execute => {
                let node = self.resolve(job, event.time)?;
                node.start_times.push(event.time);
                node.state = Some(NodeState::Running);
                node.recorded_site = false;
                Ok(())
            }
            EventKind::Terminated => self.on_terminated(event, job),
            EventKind::PostScriptTerminated => self.on_post_script(event),
            EventKind::ShadowException | EventKind::ReconnectFailed | EventKind::Evicted => {
                self.on_restart(event, job)
            }
            EventKind::Aborted => self.on_aborted(event, job),
            EventKind::Held => self.on_held(event, job),
            EventKind::Released => {
                let node = self.resolve(job, event.time)?;
                node.state = Some(NodeState::Idle);
                Ok(())
            }
            EventKind::AdInformation => {
                let node = self.resolve(job, event.time)?;
                if !node.recorded_site {
                    if let Some(site) = &event.site {
                        // "$$(...)" means the scheduler has not substituted
                        // the site macro yet.
                        if !site.starts_with("$$") {
                            node.site_history.push(site.clone());
                            node.recorded_site = true;
                        }
                    }
                }
                insert_cpu(event, node);
                Ok(())
            }
            EventKind::ImageSize => {
                let node = self.resolve(job, event.time)?;
                if let (Some(size), Some(slot)) =
                    (event.resident_set_size, node.resident_set_size.last_mut())
                {
                    *slot = size;
                }
                if let Some(&start) = node.start_times.last() {
                    if let Some(slot) = node.wall_durations.last_mut() {
                        *slot = (event.time - start) as f64;
                    }
                }
                insert_cpu(event, node);
                Ok(())
            }
            // Transient connectivity blips between the scheduler and the
            // execution slot; the node status is unaffected.
            EventKind::Disconnected | EventKind::Reconnected => Ok(()),
            EventKind::Unknown(tag) => {
                warn!("Unknown event type: {}", tag);
                Ok(())
            }
        }
    }

    fn on_submit(&mut self, event: &JobEvent, job: JobId) -> Result<(), EventLogError> {
        let Some(node_id) = event.dag_node.as_deref().and_then(parse_node_name) else {
            debug!("Submit event at {} without a DAG node name", event.time);
            return Ok(());
        };
        let node = self.nodes.entry(node_id).or_default();
        node.state = Some(NodeState::Idle);
        node.job_ids.push(job);
        node.recorded_site = false;
        node.submit_times.push(event.time);
        node.push_attempt_slot();
        node.retries = (node.submit_times.len() - 1) as u32;
        self.proc_map.insert(job, node_id);
        Ok(())
    }

    fn on_terminated(&mut self, event: &JobEvent, job: JobId) -> Result<(), EventLogError> {
        let node_id = self.node_for(job, event.time)?;
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(EventLogError::UnknownJob {
                job,
                time: event.time,
            })?;
        node.end_times.push(event.time);
        let start = *node
            .start_times
            .last()
            .ok_or(EventLogError::InconsistentHistory {
                node: node_id,
                time: event.time,
            })?;
        if let Some(slot) = node.wall_durations.last_mut() {
            *slot = (event.time - start) as f64;
        }
        insert_cpu(event, node);
        let normal = event.terminated_normally.unwrap_or(false);
        if normal && event.return_value == Some(0) {
            node.state = Some(NodeState::Transferring);
        } else {
            node.state = Some(NodeState::Cooloff);
        }
        Ok(())
    }

    /// Post-scripts run outside the job slot, so the event resolves through
    /// the node-name payload field rather than the job id.
    fn on_post_script(&mut self, event: &JobEvent) -> Result<(), EventLogError> {
        let Some(node_id) = event.dag_node.as_deref().and_then(parse_node_name) else {
            debug!("Post-script event at {} without a DAG node name", event.time);
            return Ok(());
        };
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(EventLogError::UnknownNode {
                node: node_id,
                time: event.time,
            })?;
        let normal = event.terminated_normally.unwrap_or(false);
        node.state = Some(if !normal {
            NodeState::Cooloff
        } else {
            match event.return_value {
                Some(0) => NodeState::Finished,
                Some(2) => NodeState::Failed,
                _ => NodeState::Cooloff,
            }
        });
        Ok(())
    }

    /// Shadow exception, reconnect failure, eviction: the attempt is over but
    /// the scheduler will re-execute without a fresh submission. Opens a
    /// restart slot reusing the prior job id.
    fn on_restart(&mut self, event: &JobEvent, job: JobId) -> Result<(), EventLogError> {
        let node = self.resolve(job, event.time)?;
        if node.state == Some(NodeState::Idle) {
            return Ok(());
        }
        node.end_times.push(event.time);
        close_wall_duration(node, event.time);
        node.state = Some(NodeState::Idle);
        insert_cpu(event, node);
        node.push_attempt_slot();
        node.submit_times.push(NO_TIMESTAMP);
        if let Some(&prior) = node.job_ids.last() {
            node.job_ids.push(prior);
        }
        node.restarts += 1;
        Ok(())
    }

    fn on_aborted(&mut self, event: &JobEvent, job: JobId) -> Result<(), EventLogError> {
        let node = self.resolve(job, event.time)?;
        if matches!(node.state, Some(NodeState::Idle) | Some(NodeState::Held)) {
            node.start_times.push(NO_TIMESTAMP);
            if !node.recorded_site {
                node.site_history.push("Unknown".to_string());
            }
        }
        node.state = Some(NodeState::Killed);
        insert_cpu(event, node);
        Ok(())
    }

    fn on_held(&mut self, event: &JobEvent, job: JobId) -> Result<(), EventLogError> {
        let node = self.resolve(job, event.time)?;
        if node.state == Some(NodeState::Running) {
            node.end_times.push(event.time);
            close_wall_duration(node, event.time);
            insert_cpu(event, node);
            node.push_attempt_slot();
            node.submit_times.push(NO_TIMESTAMP);
            if let Some(&prior) = node.job_ids.last() {
                node.job_ids.push(prior);
            }
            node.restarts += 1;
        }
        node.state = Some(NodeState::Held);
        Ok(())
    }

    fn node_for(&self, job: JobId, time: i64) -> Result<u32, EventLogError> {
        self.proc_map
            .get(&job)
            .copied()
            .ok_or(EventLogError::UnknownJob { job, time })
    }

    fn resolve(&mut self, job: JobId, time: i64) -> Result<&mut NodeRunHistory, EventLogError> {
        let node_id = self.node_for(job, time)?;
        self.nodes
            .get_mut(&node_id)
            .ok_or(EventLogError::UnknownJob { job, time })
    }

    /// Reconciles `wall_durations` and `site_history` to equal length so
    /// downstream consumers can zip them: an in-flight attempt gets
    /// `now - last start`, a missing site gets `"Unknown"`.
    fn reconcile(&mut self, now: i64) {
        for node in self.nodes.values_mut() {
            if node.state == Some(NodeState::Running) {
                if let (Some(&start), Some(slot)) =
                    (node.start_times.last(), node.wall_durations.last_mut())
                {
                    if start != NO_TIMESTAMP {
                        *slot = (now - start) as f64;
                    }
                }
            }
            let last_start = node.start_times.last().copied().unwrap_or(now);
            while node.wall_durations.len() < node.site_history.len() {
                node.wall_durations.push((now - last_start) as f64);
            }
            while node.wall_durations.len() > node.site_history.len() {
                node.site_history.push("Unknown".to_string());
            }
        }
    }
}

/// Extracts the numeric node id from the free-text `"Job<N>"` name field.
fn parse_node_name(name: &str) -> Option<u32> {
    let captures = NODE_NAME_RE.captures(name)?;
    captures[1].parse().ok()
}

/// Imports CPU usage from an event into the current attempt slot.
///
/// Two wire representations exist: the composite `"Usr D H:M:S, Sys D H:M:S"`
/// string, or separate numeric seconds fields. The most recently seen value
/// wins.
fn insert_cpu(event: &JobEvent, node: &mut NodeRunHistory) {
    if let Some(usage) = &event.total_remote_usage {
        if let Some(captures) = CPU_RE.captures(usage) {
            let field = |i: usize| captures[i].parse::<f64>().unwrap_or(0.0);
            let user = field(1) * 3600.0 + field(2) * 60.0 + field(3);
            let sys = field(4) * 3600.0 + field(5) * 60.0 + field(6);
            if let Some(slot) = node.total_user_cpu_history.last_mut() {
                *slot = user;
            }
            if let Some(slot) = node.total_sys_cpu_history.last_mut() {
                *slot = sys;
            }
        }
    } else {
        if let (Some(sys), Some(slot)) = (event.remote_sys_cpu, node.total_sys_cpu_history.last_mut())
        {
            *slot = sys;
        }
        if let (Some(user), Some(slot)) =
            (event.remote_user_cpu, node.total_user_cpu_history.last_mut())
        {
            *slot = user;
        }
    }
}

fn close_wall_duration(node: &mut NodeRunHistory, end: i64) {
    if node.wall_durations.is_empty() || node.end_times.is_empty() {
        return;
    }
    if let Some(&start) = node.start_times.last() {
        if let Some(slot) = node.wall_durations.last_mut() {
            *slot = (end - start) as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_010_000;

    fn event(json: &str) -> String {
        format!("{}\n", json)
    }

    fn submit(node: u32, cluster: i64, time: i64) -> String {
        event(&format!(
            r#"{{"type": "submit", "time": {time}, "cluster": {cluster}, "proc": 0, "dag_node": "DAG Node: Job{node}"}}"#
        ))
    }

    fn execute(cluster: i64, time: i64) -> String {
        event(&format!(
            r#"{{"type": "execute", "time": {time}, "cluster": {cluster}, "proc": 0}}"#
        ))
    }

    fn terminate(cluster: i64, time: i64, code: i64) -> String {
        event(&format!(
            r#"{{"type": "terminated", "time": {time}, "cluster": {cluster}, "proc": 0, "terminated_normally": true, "return_value": {code}}}"#
        ))
    }

    #[test]
    fn test_successful_attempt_ends_transferring() {
        let log = submit(1, 10, 1000) + &execute(10, 1100) + &terminate(10, 1400, 0);
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.state, Some(NodeState::Transferring));
        assert_eq!(node.retries, 0);
        assert_eq!(node.wall_durations, vec![300.0]);
        assert_eq!(node.job_ids[0].to_string(), "10.0");
    }

    #[test]
    fn test_nonzero_exit_ends_cooloff() {
        let log = submit(1, 10, 1000) + &execute(10, 1100) + &terminate(10, 1400, 137);
        let nodes = parse_job_log(&log, NOW).unwrap();
        assert_eq!(nodes[&1].state, Some(NodeState::Cooloff));
    }

    #[test]
    fn test_abnormal_termination_ends_cooloff() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "terminated", "time": 1400, "cluster": 10, "proc": 0, "terminated_normally": false, "return_value": 0}"#,
            );
        let nodes = parse_job_log(&log, NOW).unwrap();
        assert_eq!(nodes[&1].state, Some(NodeState::Cooloff));
    }

    #[test]
    fn test_attempt_lists_grow_in_lock_step() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(r#"{"type": "evicted", "time": 1200, "cluster": 10, "proc": 0}"#)
            + &execute(10, 1300)
            + &terminate(10, 1500, 0);
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        let len = node.wall_durations.len();
        assert_eq!(len, 2);
        assert_eq!(node.resident_set_size.len(), len);
        assert_eq!(node.total_user_cpu_history.len(), len);
        assert_eq!(node.total_sys_cpu_history.len(), len);
        assert_eq!(node.site_history.len(), len);
    }

    #[test]
    fn test_hold_release_is_a_restart_not_a_retry() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(r#"{"type": "held", "time": 1200, "cluster": 10, "proc": 0}"#)
            + &event(r#"{"type": "released", "time": 1300, "cluster": 10, "proc": 0}"#);
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.restarts, 1);
        assert_eq!(node.retries, 0);
        assert_eq!(node.state, Some(NodeState::Idle));
        // The restart slot reuses the prior job id and a sentinel submit time.
        assert_eq!(node.job_ids, vec![node.job_ids[0], node.job_ids[0]]);
        assert_eq!(node.submit_times, vec![1000, NO_TIMESTAMP]);
    }

    #[test]
    fn test_hold_while_idle_does_not_open_a_slot() {
        let log = submit(1, 10, 1000)
            + &event(r#"{"type": "held", "time": 1200, "cluster": 10, "proc": 0}"#);
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.state, Some(NodeState::Held));
        assert_eq!(node.restarts, 0);
        assert_eq!(node.wall_durations.len(), 1);
    }

    #[test]
    fn test_resubmission_counts_a_retry() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &terminate(10, 1200, 1)
            + &submit(1, 11, 1300);
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.retries, 1);
        assert_eq!(node.restarts, 0);
        assert_eq!(node.state, Some(NodeState::Idle));
        assert_eq!(node.job_ids.len(), 2);
    }

    #[test]
    fn test_abort_of_idle_job_records_unknown_site() {
        let log = submit(1, 10, 1000)
            + &event(r#"{"type": "aborted", "time": 1100, "cluster": 10, "proc": 0}"#);
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.state, Some(NodeState::Killed));
        assert_eq!(node.site_history, vec!["Unknown"]);
        assert_eq!(node.start_times, vec![NO_TIMESTAMP]);
    }

    #[test]
    fn test_ad_information_records_site_once_per_attempt() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "ad_information", "time": 1150, "cluster": 10, "proc": 0, "site": "SITE_A"}"#,
            )
            + &event(
                r#"{"type": "ad_information", "time": 1160, "cluster": 10, "proc": 0, "site": "SITE_B"}"#,
            );
        let nodes = parse_job_log(&log, NOW).unwrap();
        assert_eq!(nodes[&1].site_history, vec!["SITE_A"]);
    }

    #[test]
    fn test_template_placeholder_site_is_ignored() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "ad_information", "time": 1150, "cluster": 10, "proc": 0, "site": "$$(GLIDEIN_Site:Unknown)"}"#,
            )
            + &terminate(10, 1400, 0);
        let nodes = parse_job_log(&log, NOW).unwrap();
        // No site was ever resolved; the reconciliation pass pads it.
        assert_eq!(nodes[&1].site_history, vec!["Unknown"]);
    }

    #[test]
    fn test_composite_cpu_string_overrides_numeric_fields() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "terminated", "time": 5000, "cluster": 10, "proc": 0, "terminated_normally": true, "return_value": 0, "total_remote_usage": "Usr 0 01:02:03, Sys 0 00:10:00"}"#,
            );
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.total_user_cpu_history, vec![3723.0]);
        assert_eq!(node.total_sys_cpu_history, vec![600.0]);
    }

    #[test]
    fn test_numeric_cpu_fields() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "terminated", "time": 5000, "cluster": 10, "proc": 0, "terminated_normally": true, "return_value": 0, "remote_user_cpu": 120.5, "remote_sys_cpu": 3.5}"#,
            );
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.total_user_cpu_history, vec![120.5]);
        assert_eq!(node.total_sys_cpu_history, vec![3.5]);
    }

    #[test]
    fn test_image_size_updates_current_attempt() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "image_size", "time": 1600, "cluster": 10, "proc": 0, "resident_set_size": 250000}"#,
            );
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.resident_set_size, vec![250000]);
        // The attempt is still running, so its duration is anchored to `now`.
        assert_eq!(node.wall_durations, vec![(NOW - 1100) as f64]);
    }

    #[test]
    fn test_post_script_exit_codes() {
        for (code, expected) in [
            (0, NodeState::Finished),
            (2, NodeState::Failed),
            (1, NodeState::Cooloff),
        ] {
            let log = submit(1, 10, 1000)
                + &execute(10, 1100)
                + &terminate(10, 1400, 0)
                + &event(&format!(
                    r#"{{"type": "post_script_terminated", "time": 1500, "cluster": 0, "proc": 0, "dag_node": "Job1", "terminated_normally": true, "return_value": {code}}}"#
                ));
            let nodes = parse_job_log(&log, NOW).unwrap();
            assert_eq!(nodes[&1].state, Some(expected), "post-script code {}", code);
        }
    }

    #[test]
    fn test_unknown_event_type_is_skipped() {
        let log = submit(1, 10, 1000)
            + &event(r#"{"type": "checkpointed", "time": 1050, "cluster": 10, "proc": 0}"#)
            + &execute(10, 1100);
        let nodes = parse_job_log(&log, NOW).unwrap();
        assert_eq!(nodes[&1].state, Some(NodeState::Running));
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let log = submit(1, 10, 1000) + "this is not json\n" + &execute(10, 1100);
        let nodes = parse_job_log(&log, NOW).unwrap();
        assert_eq!(nodes[&1].state, Some(NodeState::Running));
    }

    #[test]
    fn test_event_for_unsubmitted_job_is_a_hard_fault() {
        let log = execute(99, 1100);
        let err = parse_job_log(&log, NOW).unwrap_err();
        assert!(matches!(err, EventLogError::UnknownJob { .. }));
    }

    #[test]
    fn test_in_flight_attempt_duration_is_anchored_to_now() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(
                r#"{"type": "ad_information", "time": 1150, "cluster": 10, "proc": 0, "site": "SITE_A"}"#,
            );
        let nodes = parse_job_log(&log, NOW).unwrap();
        let node = &nodes[&1];
        assert_eq!(node.site_history, vec!["SITE_A"]);
        assert_eq!(node.wall_durations, vec![(NOW - 1100) as f64]);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let log = submit(1, 10, 1000)
            + &execute(10, 1100)
            + &event(r#"{"type": "evicted", "time": 1200, "cluster": 10, "proc": 0}"#)
            + &execute(10, 1300)
            + &terminate(10, 1500, 0)
            + &submit(2, 11, 1000)
            + &event(r#"{"type": "aborted", "time": 1600, "cluster": 11, "proc": 0}"#);
        let first = parse_job_log(&log, NOW).unwrap();
        let second = parse_job_log(&log, NOW).unwrap();
        assert_eq!(first, second);
    }
}
