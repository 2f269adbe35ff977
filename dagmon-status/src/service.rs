//! Task status service
//!
//! The async entry point for one task-status request: query the scheduler
//! for the root DAG record, fetch the published status sources the requested
//! verbosity needs, and merge them into a status document.
//!
//! Input-unavailable conditions (scheduler down, no root record, node-status
//! snapshot not published yet) are folded into an `UNKNOWN` document — the
//! caller can simply retry. Hard errors are reserved for malformed inputs a
//! verbose query cannot proceed without, and for data-consistency faults in
//! the event log.
//!
//! The service holds no cross-task mutable state; one instance may serve
//! concurrent requests for different tasks.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use dagmon_client::{ClientError, SchedulerQuery, TaskWebClient};
use dagmon_core::domain::task::status;
use dagmon_core::domain::{TaskRecord, TaskStatus};

use crate::aggregator::{Verbosity, aggregate};
use crate::event_log::{EventLogError, NodeMap, parse_job_log};
use crate::node_state::parse_node_state;
use crate::site_ad::{SiteAdError, apply_site_ad};

/// Hard failures of a status request.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    SiteAd(#[from] SiteAdError),
}

/// Per-request status retrieval over an injected scheduler query and fetch
/// client.
pub struct TaskStatusService {
    scheduler: Arc<dyn SchedulerQuery>,
    web: TaskWebClient,
}

impl TaskStatusService {
    pub fn new(scheduler: Arc<dyn SchedulerQuery>, web: TaskWebClient) -> Self {
        Self { scheduler, web }
    }

    /// Produce the status document for one task.
    pub async fn status(
        &self,
        record: &TaskRecord,
        verbosity: Verbosity,
    ) -> Result<TaskStatus, StatusError> {
        info!("Got status request for task {}", record.name);

        // Tasks that never reached the scheduler (or were already terminal
        // before scheduler visibility) report their persisted status
        // verbatim, with the persisted failure message.
        if !matches!(
            record.status.as_str(),
            status::SUBMITTED | status::KILLFAILED | status::KILLED
        ) {
            return Ok(TaskStatus::with_failure(
                record.status.clone(),
                record.failure.clone().unwrap_or_default(),
            ));
        }

        let roots = match self.scheduler.root_tasks(&record.name).await {
            Ok(roots) => roots,
            Err(err) => {
                let msg = format!("{}: failed to contact scheduler: {}", record.name, err);
                warn!("{}", msg);
                return Ok(TaskStatus::unknown(msg));
            }
        };
        let Some(root) = roots.last() else {
            return Ok(TaskStatus::unknown(
                "Unable to find the root DAG record in the scheduler",
            ));
        };

        let Some(web_dir) = root.user_web_dir.as_deref() else {
            // The task is known to the scheduler but the DAG has not
            // published anything yet. While the root record is idle or
            // running that is simply "not bootstrapped yet"; otherwise the
            // bootstrap failed.
            if root.job_status == 1 || root.job_status == 2 {
                let mut doc = TaskStatus::bare(status::SUBMITTED);
                doc.task_warning_msg = Some("Task has not yet bootstrapped.".to_string());
                return Ok(doc);
            }
            return Ok(TaskStatus::unknown(
                "Task failed to bootstrap on the scheduler.",
            ));
        };

        let mut nodes = NodeMap::new();
        let mut pool = serde_json::Value::Null;
        match verbosity {
            Verbosity::Summary => {}
            Verbosity::EventLog => {
                let body = self.web.fetch_job_log(web_dir).await?;
                nodes = parse_job_log(&body, chrono::Utc::now().timestamp())?;
            }
            Verbosity::SiteInfo => {
                let body = self.web.fetch_site_ad(web_dir).await?;
                apply_site_ad(&body, root, &mut nodes)?;
                pool = self.web.fetch_pool_info().await?;
            }
        }

        match self.web.fetch_node_state(web_dir).await {
            Ok((format, body)) => parse_node_state(format, &body, &mut nodes),
            Err(err) if err.is_retriable() => {
                return Ok(TaskStatus::unknown(
                    "Node status file not currently available. \
                     Retry in a minute if you just submitted the task",
                ));
            }
            Err(err) => return Err(err.into()),
        }

        Ok(aggregate(&record.status, &record.name, root, nodes, pool))
    }
}
