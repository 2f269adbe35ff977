//! Dagmon status core
//!
//! Reconstructs per-job and per-task lifecycle state from the asynchronous
//! status sources a task publishes while it runs:
//!
//! - [`event_log`]: a pure fold over the time-ordered job event stream,
//!   producing one structured run history per DAG node
//! - [`node_state`]: the periodically refreshed node-status snapshot, in two
//!   wire formats that must produce identical state semantics
//! - [`site_ad`]: per-node schedulable sites, filtered through the task's
//!   whitelist/blacklist policy
//! - [`aggregator`]: merges node-level state with the scheduler's task-level
//!   status code into one task status document
//! - [`service`]: the async entry point that fetches all sources and runs the
//!   merge

pub mod aggregator;
pub mod event_log;
pub mod node_state;
pub mod service;
pub mod site_ad;

pub use aggregator::{Verbosity, aggregate};
pub use event_log::{EventLogError, NodeMap, parse_job_log};
pub use node_state::parse_node_state;
pub use service::{StatusError, TaskStatusService};
pub use site_ad::{apply_site_ad, filter_sites};
