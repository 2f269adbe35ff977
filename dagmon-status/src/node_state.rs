//! Node status feed parser
//!
//! The DAG controller periodically publishes a snapshot of every node's
//! status. Two wire encodings exist: a legacy line-oriented format
//! (`JOB Job<N> STATUS_X (detail)`) and a structured JSON variant carrying an
//! explicit numeric status and retry count. Both map into the same
//! [`NodeState`] vocabulary and are merged into the node map *without*
//! overwriting a more specific state already known from the event log, where
//! the individual status rules say so.
//!
//! The legacy format's `prerun` and `error` handling leans on free-text
//! heuristics that are historical but load-bearing: the legacy feed cannot
//! distinguish a first-attempt pre-run from a retry pre-run, and its error
//! status embeds the post-script failure code in prose. Both behaviors are
//! preserved exactly; do not "fix" them.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use dagmon_client::FeedFormat;
use dagmon_core::domain::{NodeRunHistory, NodeState};

use crate::event_log::NodeMap;

static JOB_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^JOB Job(\d+)\s+([A-Z_]+)\s+\((.*)\)").unwrap());
static POST_FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"POST [Ss]cript failed with status (\d+)").unwrap());

/// Parse one status snapshot into the node map.
///
/// The format was decided once at fetch time; each variant has its own
/// parser, both feeding the same sink.
pub fn parse_node_state(format: FeedFormat, input: &str, nodes: &mut NodeMap) {
    match format {
        FeedFormat::Legacy => parse_legacy(input, nodes),
        FeedFormat::Structured => parse_structured(input, nodes),
    }
}

fn parse_legacy(input: &str, nodes: &mut NodeMap) {
    for line in input.lines() {
        let Some(captures) = JOB_LINE_RE.captures(line) else {
            continue;
        };
        let Ok(node_id) = captures[1].parse::<u32>() else {
            continue;
        };
        let status = &captures[2];
        let detail = &captures[3];
        let node = nodes.entry(node_id).or_default();
        match status {
            "STATUS_READY" => apply_ready(node),
            // The legacy feed carries no retry count, so it cannot tell a
            // first-attempt pre-run from a retry pre-run; cooloff always.
            "STATUS_PRERUN" => node.state = Some(NodeState::Cooloff),
            "STATUS_SUBMITTED" => apply_submitted(node, detail),
            "STATUS_POSTRUN" => apply_postrun(node),
            "STATUS_DONE" => node.state = Some(NodeState::Finished),
            "STATUS_ERROR" => {
                // Post-script failure code embedded in the detail text:
                // code 2 is the post-script's own "job failed" verdict,
                // anything else was historically a transient retry.
                node.state = Some(match POST_FAILURE_RE.captures(detail) {
                    Some(failure) if &failure[1] == "2" => NodeState::Failed,
                    Some(_) => NodeState::Cooloff,
                    None => NodeState::Failed,
                });
            }
            other => warn!("Unknown node status in legacy feed: {}", other),
        }
    }
}

/// One record of the structured snapshot variant.
#[derive(Debug, Deserialize)]
struct StructuredRecord {
    #[serde(rename = "type", default)]
    record_type: String,
    #[serde(default)]
    node: String,
    #[serde(default = "default_status")]
    status: i64,
    #[serde(default = "default_retry")]
    retry: i64,
    #[serde(default)]
    detail: String,
}

fn default_status() -> i64 {
    -1
}

fn default_retry() -> i64 {
    -1
}

fn parse_structured(input: &str, nodes: &mut NodeMap) {
    let records: Vec<StructuredRecord> = match serde_json::from_str(input) {
        Ok(records) => records,
        Err(err) => {
            warn!("Malformed structured node status snapshot: {}", err);
            return;
        }
    };
    for record in records {
        if record.record_type != "node_status" {
            continue;
        }
        let Some(node_id) = record
            .node
            .strip_prefix("Job")
            .and_then(|id| id.parse::<u32>().ok())
        else {
            continue;
        };
        let node = nodes.entry(node_id).or_default();
        match record.status {
            1 => apply_ready(node),
            2 => {
                // Retry count 0 means the node has never been submitted, so
                // unsubmitted is more accurate than the legacy cooloff.
                node.state = Some(if record.retry == 0 {
                    NodeState::Unsubmitted
                } else {
                    NodeState::Cooloff
                });
            }
            3 => apply_submitted(node, &record.detail),
            4 => apply_postrun(node),
            5 => node.state = Some(NodeState::Finished),
            6 => {
                // Older controllers parked retriable jobs in the error status
                // for a short window, which forced transient-retry guessing
                // from the detail text. That behavior is gone: the structured
                // feed's error status is terminal.
                node.state = Some(NodeState::Failed);
            }
            other => warn!("Unknown node status code in structured feed: {}", other),
        }
    }
}

/// `ready` is a resubmission signal: a completed attempt awaiting retry is
/// demoted from transferring to cooloff; otherwise the node has simply not
/// been submitted yet.
fn apply_ready(node: &mut NodeRunHistory) {
    if node.state == Some(NodeState::Transferring) {
        node.state = Some(NodeState::Cooloff);
    } else if node.state != Some(NodeState::Cooloff) {
        node.state = Some(NodeState::Unsubmitted);
    }
}

/// `submitted` only fills in a state if no source recorded one yet.
fn apply_submitted(node: &mut NodeRunHistory, detail: &str) {
    if detail == "not_idle" {
        node.state_default(NodeState::Running);
    } else {
        node.state_default(NodeState::Idle);
    }
}

fn apply_postrun(node: &mut NodeRunHistory) {
    if node.state != Some(NodeState::Cooloff) {
        node.state = Some(NodeState::Transferring);
    }
}
