//! Structured job report
//!
//! The payload process writes a JSON report describing step-level performance
//! counters and an overall exit code. The report may be absent or unparsable;
//! that is a meaningful state the classifier handles ("no usable report"),
//! not an error to propagate.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

/// The step whose performance counters gate retry escalation.
pub const PAYLOAD_STEP: &str = "payload";

/// Parsed job report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobReport {
    /// Payload exit code; absent means the exit-code check passes through.
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub exit_msg: Option<String>,
    /// Site the payload actually ran on, for outcome attribution.
    #[serde(default)]
    pub executed_site: Option<String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepReport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepReport {
    #[serde(default)]
    pub performance: StepPerformance,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepPerformance {
    #[serde(default)]
    pub cpu: CpuCounters,
    #[serde(default)]
    pub memory: MemoryCounters,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuCounters {
    /// Total wall time of the step, in seconds.
    #[serde(default)]
    pub total_job_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryCounters {
    /// Peak resident set size of the step, in megabytes.
    #[serde(default)]
    pub peak_rss_mb: Option<f64>,
}

impl JobReport {
    /// Parse a report document. `None` means "no usable report": any missing
    /// level or malformed JSON degrades to the same recoverable outcome.
    pub fn parse(input: &str) -> Option<JobReport> {
        match serde_json::from_str(input) {
            Ok(report) => Some(report),
            Err(err) => {
                warn!("Unparsable job report: {}", err);
                None
            }
        }
    }

    /// Wall time of the payload step, if the report carries it.
    pub fn payload_total_job_time(&self) -> Option<f64> {
        self.steps.get(PAYLOAD_STEP)?.performance.cpu.total_job_time
    }

    /// Peak resident memory of the payload step in MB, if reported.
    pub fn payload_peak_rss_mb(&self) -> Option<f64> {
        self.steps.get(PAYLOAD_STEP)?.performance.memory.peak_rss_mb
    }
}
