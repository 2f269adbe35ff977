//! Dagmon retry classifier
//!
//! Given one completed job's scheduler record and its structured job report,
//! decide whether the DAG controller should retry it: `Ok` (success),
//! `Recoverable` (transient failure, retry), or `Fatal` (retrying cannot
//! help). `Fatal` and `Recoverable` are designed outputs, not errors.
//!
//! The classifier is stateless and safe for unlimited concurrent invocation
//! across unrelated jobs. Its only side effect — the advisory outcome
//! counters — goes through an injected [`sink::OutcomeSink`] capability, so
//! tests substitute an in-memory sink and production uses append-only files
//! that tolerate concurrent writers.

pub mod classifier;
pub mod report;
pub mod sink;

pub use classifier::{Classifier, RetryContext, RetryPolicy, SchedulerJobAd};
pub use report::JobReport;
pub use sink::{FileOutcomeSink, MemoryOutcomeSink, OutcomeSink};
