//! Retry classifier verdicts

use serde::{Deserialize, Serialize};

/// Recorded outcome of one classified job.
///
/// This is the closed vocabulary used by the advisory outcome counters; the
/// name feeds the counter file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Ok,
    Recoverable,
    Fatal,
}

impl Outcome {
    /// Stable uppercase name, used in the counter file names.
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::Recoverable => "RECOVERABLE",
            Outcome::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The retry classifier's decision for one completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDecision {
    /// The job succeeded; no retry needed.
    Ok,
    /// Transient failure: the DAG controller should retry the job.
    Recoverable(String),
    /// Permanent failure: retrying cannot help, abandon the job.
    Fatal(String),
    /// The classifier itself failed; no verdict. Lowest-confidence outcome,
    /// distinct from `Ok` and never recorded to the counters.
    Inconclusive,
}

impl RetryDecision {
    /// The recordable outcome for this decision, if any.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            RetryDecision::Ok => Some(Outcome::Ok),
            RetryDecision::Recoverable(_) => Some(Outcome::Recoverable),
            RetryDecision::Fatal(_) => Some(Outcome::Fatal),
            RetryDecision::Inconclusive => None,
        }
    }

    /// Human-readable reason, empty for `Ok`/`Inconclusive`.
    pub fn reason(&self) -> &str {
        match self {
            RetryDecision::Recoverable(reason) | RetryDecision::Fatal(reason) => reason,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        assert_eq!(Outcome::Ok.name(), "OK");
        assert_eq!(Outcome::Recoverable.name(), "RECOVERABLE");
        assert_eq!(Outcome::Fatal.name(), "FATAL");
    }

    #[test]
    fn test_inconclusive_is_not_recordable() {
        assert_eq!(RetryDecision::Inconclusive.outcome(), None);
        assert_eq!(
            RetryDecision::Fatal("code 99".to_string()).outcome(),
            Some(Outcome::Fatal)
        );
    }
}
