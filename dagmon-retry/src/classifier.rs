//! Retry classifier
//!
//! A pure decision function over one completed job: the scheduler's job ad
//! history, the structured job report, the wrapper's own exit status, and
//! (for two signal-specific checks) the wrapper log text. Checks run in a
//! fixed order and the first match wins, with one explicit escalation path:
//! a recoverable exit code is re-checked against the resource ceilings, and
//! a job that has already consumed excessive CPU, wall time, or memory stops
//! being worth retrying.
//!
//! All inputs arrive in an immutable [`RetryContext`]; the check functions
//! return their verdicts instead of mutating shared state.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, warn};

use dagmon_core::domain::RetryDecision;

use crate::report::JobReport;
use crate::sink::OutcomeSink;

/// Log line marking an illegal-instruction signal, which points at the
/// worker node rather than the job.
const FATAL_SIGNAL_MARKER: &str = "A fatal system signal has occurred: illegal instruction";

static CACHE_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"unable to load /cvmfs/.*file too short").unwrap());

/// Exit codes for "failed to open local and fallback files". The wrapper
/// sometimes reports only the low 8 bits, so each code also matches its
/// posix truncation.
const FILE_OPEN_CODES: [i64; 4] = [8021, 8028, 8020, 60307];

/// Resource ceilings for retry escalation.
///
/// Task-configurable; the defaults are the values observed to separate
/// transient failures from jobs that are simply too expensive to re-run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt wall time ceiling, seconds.
    pub max_walltime_secs: f64,
    /// Ceiling on the integrated wall time across all attempts, as a factor
    /// of `max_walltime_secs`.
    pub integrated_walltime_factor: f64,
    /// Peak resident memory ceiling, MB.
    pub max_memory_mb: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_walltime_secs: (21 * 60 * 60 + 30 * 60) as f64,
            integrated_walltime_factor: 1.5,
            max_memory_mb: (2 * 1024) as f64,
        }
    }
}

/// One scheduler job ad from the user log, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SchedulerJobAd {
    /// Why the scheduler removed the job, if it did.
    pub remove_reason: Option<String>,
    pub hold_reason: Option<String>,
    pub last_hold_reason: Option<String>,
    /// Wall clock seconds this ad's execution consumed.
    pub remote_wall_clock_time: Option<f64>,
    /// Execution site recorded by the glide-in.
    pub site: Option<String>,
}

/// Immutable inputs for classifying one job.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Scheduler ad history for this job slot, newest last. The newest ad is
    /// the authoritative one; the full history feeds the integrated wall
    /// time sum.
    pub ads: &'a [SchedulerJobAd],
    /// Parsed job report; `None` means no usable report exists.
    pub report: Option<&'a JobReport>,
    /// Job identifier within the task, recorded to the outcome counters.
    pub job_id: &'a str,
    /// The wrapper's own exit status, distinct from the payload exit code.
    pub wrapper_status: i64,
    /// Wrapper log text, for the signal and cache-miss content checks.
    pub wrapper_log: Option<&'a str>,
}

impl RetryContext<'_> {
    fn current_ad(&self) -> Option<&SchedulerJobAd> {
        self.ads.last()
    }

    /// Site to attribute the outcome to: the report's executed site wins,
    /// the scheduler ad's site is the fallback.
    pub fn site(&self) -> Option<&str> {
        self.report
            .and_then(|r| r.executed_site.as_deref())
            .or_else(|| self.current_ad().and_then(|ad| ad.site.as_deref()))
    }

    fn remove_reason(&self) -> &str {
        self.current_ad()
            .and_then(|ad| ad.remove_reason.as_deref())
            .unwrap_or("")
    }

    fn log_lines_contain(&self, marker: &str) -> bool {
        self.wrapper_log
            .map(|log| log.lines().any(|line| line.contains(marker)))
            .unwrap_or(false)
    }

    fn log_lines_match(&self, re: &Regex) -> bool {
        self.wrapper_log
            .map(|log| log.lines().any(|line| re.is_match(line)))
            .unwrap_or(false)
    }
}

/// Internal check verdict; `Ok(())` means "this check passes, keep going".
type CheckResult = Result<(), CheckFail>;

enum CheckFail {
    Recoverable(String),
    Fatal(String),
}

fn recoverable(reason: impl Into<String>) -> CheckFail {
    CheckFail::Recoverable(reason.into())
}

fn fatal(reason: impl Into<String>) -> CheckFail {
    CheckFail::Fatal(reason.into())
}

/// The retry classifier: a policy plus an advisory outcome sink.
pub struct Classifier<S: OutcomeSink> {
    policy: RetryPolicy,
    sink: S,
}

impl<S: OutcomeSink> Classifier<S> {
    pub fn new(policy: RetryPolicy, sink: S) -> Self {
        Self { policy, sink }
    }

    /// Classify one job and record the outcome.
    ///
    /// Never panics past this boundary: an internal failure yields
    /// [`RetryDecision::Inconclusive`], which is not recorded.
    pub fn execute(&self, ctx: &RetryContext<'_>) -> RetryDecision {
        let decision = match catch_unwind(AssertUnwindSafe(|| self.classify(ctx))) {
            Ok(decision) => decision,
            Err(_) => {
                error!("Retry classification failed internally for job {}", ctx.job_id);
                return RetryDecision::Inconclusive;
            }
        };
        if let Some(outcome) = decision.outcome() {
            self.sink.record(ctx.site(), outcome, ctx.job_id);
        }
        decision
    }

    fn classify(&self, ctx: &RetryContext<'_>) -> RetryDecision {
        match self.run_checks(ctx) {
            Ok(()) => RetryDecision::Ok,
            Err(CheckFail::Recoverable(reason)) => RetryDecision::Recoverable(reason),
            Err(CheckFail::Fatal(reason)) => RetryDecision::Fatal(reason),
        }
    }

    fn run_checks(&self, ctx: &RetryContext<'_>) -> CheckResult {
        check_held_removal(ctx)?;
        check_usable_report(ctx)?;

        if let Err(failure) = check_exit_code(ctx) {
            match failure {
                CheckFail::Recoverable(reason) => {
                    // A transiently-failing job that has already consumed
                    // excessive resources stops being worth retrying.
                    if let Err(escalated) =
                        self.check_memory(ctx).and_then(|()| self.check_cpu(ctx))
                    {
                        warn!("Escalating recoverable failure for job {}: {}", ctx.job_id, reason);
                        return Err(escalated);
                    }
                    return Err(recoverable(reason));
                }
                other => return Err(other),
            }
        }

        if ctx.wrapper_status != 0 {
            return Err(recoverable(format!(
                "Payload job was successful, but the wrapper exited with non-zero status {} (stage-out failure?)",
                ctx.wrapper_status
            )));
        }

        Ok(())
    }

    /// Wall time ceilings. A watchdog kill for wall clock means there is
    /// probably no report at all; the remove reason is authoritative.
    fn check_cpu(&self, ctx: &RetryContext<'_>) -> CheckResult {
        if ctx.remove_reason().starts_with("Removed due to wall clock limit") {
            return Err(fatal(
                "Not retrying job due to wall clock limit (job killed by the task watchdog)",
            ));
        }

        let Some(total_job_time) = ctx.report.and_then(JobReport::payload_total_job_time) else {
            return Ok(());
        };
        let integrated: f64 = ctx
            .ads
            .iter()
            .filter_map(|ad| ad.remote_wall_clock_time)
            .sum();

        if total_job_time > self.policy.max_walltime_secs {
            return Err(fatal(format!(
                "Not retrying a long running job (job ran for {} hours)",
                (total_job_time / 3600.0) as i64
            )));
        }
        if integrated > self.policy.integrated_walltime_factor * self.policy.max_walltime_secs {
            return Err(fatal(format!(
                "Not retrying a job because the integrated time across all retries is {} hours.",
                (integrated / 3600.0) as i64
            )));
        }
        Ok(())
    }

    /// Memory ceiling, same structure as the wall time check.
    fn check_memory(&self, ctx: &RetryContext<'_>) -> CheckResult {
        if ctx.remove_reason().starts_with("Removed due to memory use") {
            return Err(fatal(
                "Not retrying job due to excessive memory use (job killed by the task watchdog)",
            ));
        }

        let Some(peak_rss) = ctx.report.and_then(JobReport::payload_peak_rss_mb) else {
            return Ok(());
        };
        if peak_rss > self.policy.max_memory_mb {
            return Err(fatal(format!(
                "Not retrying job due to excessive memory use ({} MB)",
                peak_rss as i64
            )));
        }
        Ok(())
    }
}

/// A job the scheduler removed for being held will be retried; the hold
/// reason goes into the decision for the operator to read.
fn check_held_removal(ctx: &RetryContext<'_>) -> CheckResult {
    if !ctx
        .remove_reason()
        .starts_with("Removed due to job being held")
    {
        return Ok(());
    }
    let hold_reason = ctx
        .current_ad()
        .and_then(|ad| {
            ad.hold_reason
                .as_deref()
                .or(ad.last_hold_reason.as_deref())
        })
        .unwrap_or("Unknown");
    Err(recoverable(format!(
        "Will retry held job; last hold reason: {}",
        hold_reason
    )))
}

fn check_usable_report(ctx: &RetryContext<'_>) -> CheckResult {
    if ctx.report.is_none() {
        return Err(recoverable(
            "Job did not produce a usable job report.",
        ));
    }
    Ok(())
}

/// The closed exit-code table. Exit code 0 (or an absent code) falls
/// through to the later checks.
fn check_exit_code(ctx: &RetryContext<'_>) -> CheckResult {
    let Some(report) = ctx.report else {
        return Ok(());
    };
    let Some(exit_code) = report.exit_code else {
        return Ok(());
    };
    let exit_msg = report.exit_msg.as_deref().unwrap_or("UNKNOWN");

    if FILE_OPEN_CODES
        .iter()
        .any(|&code| exit_code == code || exit_code == code % 256)
    {
        return Err(recoverable("Job failed to open local and fallback files."));
    }
    if exit_code == 1 {
        return Err(recoverable(
            "Job failed to bootstrap the runtime; likely a worker node issue",
        ));
    }
    if exit_code == 50513 {
        return Err(recoverable(
            "Job did not find a functioning runtime on the worker node.",
        ));
    }
    if exit_code == 50115 || exit_code == 50115 % 256 {
        return Err(recoverable("Job did not produce a report; will retry."));
    }

    // SIGABRT is fatal unless the log shows the illegal-instruction signal,
    // which indicates a broken worker node.
    if exit_code == 134 && ctx.log_lines_contain(FATAL_SIGNAL_MARKER) {
        return Err(recoverable("SIGILL; may indicate a worker node issue"));
    }

    // Read failures are fatal unless the log shows a truncated cache file on
    // the worker node.
    if (exit_code == 65 || exit_code == 8001) && ctx.log_lines_match(&CACHE_ISSUE_RE) {
        return Err(recoverable("Worker node cache issue detected"));
    }

    if exit_code == 137 {
        return Err(recoverable("SIGKILL; likely an unrelated batch system kill"));
    }
    if exit_code == 10034 || exit_code == 10034 % 256 {
        return Err(recoverable(
            "Required application version is not found at the site",
        ));
    }

    if exit_code != 0 {
        return Err(fatal(format!(
            "Job exited with code {}. Exit message: {}",
            exit_code, exit_msg
        )));
    }
    Ok(())
}
