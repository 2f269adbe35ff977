//! Advisory outcome counters
//!
//! Each classified job appends its id to two counter files named by outcome:
//! one per site, one global. The counters are advisory bookkeeping — a write
//! failure is logged and swallowed, never propagated into the retry
//! decision. Appends are open-append-close with no read-modify-write, so
//! concurrent job instances can record safely.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::error;

use dagmon_core::domain::Outcome;

/// Injected capability for recording classifier outcomes.
pub trait OutcomeSink: Send + Sync {
    /// Record one job's outcome. Must never fail loudly; implementations
    /// swallow and log their own errors.
    fn record(&self, site: Option<&str>, outcome: Outcome, job_id: &str);
}

/// Append-only counter files in a task directory.
#[derive(Debug, Clone)]
pub struct FileOutcomeSink {
    dir: PathBuf,
}

impl FileOutcomeSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn append(&self, file_name: &str, job_id: &str) {
        let path = self.dir.join(file_name);
        if let Err(err) = append_line(&path, job_id) {
            error!("Failed to record outcome in {}: {}", path.display(), err);
        }
    }
}

impl OutcomeSink for FileOutcomeSink {
    fn record(&self, site: Option<&str>, outcome: Outcome, job_id: &str) {
        if let Some(site) = site {
            self.append(&format!("task_statistics.{}.{}", site, outcome.name()), job_id);
        }
        self.append(&format!("task_statistics.{}", outcome.name()), job_id);
    }
}

fn append_line(path: &Path, job_id: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", job_id)
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryOutcomeSink {
    records: Mutex<Vec<(Option<String>, Outcome, String)>>,
}

impl MemoryOutcomeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Option<String>, Outcome, String)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl OutcomeSink for MemoryOutcomeSink {
    fn record(&self, site: Option<&str>, outcome: Outcome, job_id: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((site.map(str::to_string), outcome, job_id.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_appends_per_site_and_global() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileOutcomeSink::new(dir.path());
        sink.record(Some("SITE_A"), Outcome::Recoverable, "7");
        sink.record(Some("SITE_A"), Outcome::Recoverable, "9");
        sink.record(None, Outcome::Fatal, "11");

        let site_file =
            std::fs::read_to_string(dir.path().join("task_statistics.SITE_A.RECOVERABLE")).unwrap();
        assert_eq!(site_file, "7\n9\n");
        let global =
            std::fs::read_to_string(dir.path().join("task_statistics.RECOVERABLE")).unwrap();
        assert_eq!(global, "7\n9\n");
        let fatal = std::fs::read_to_string(dir.path().join("task_statistics.FATAL")).unwrap();
        assert_eq!(fatal, "11\n");
        // No per-site file when the site is unknown.
        assert!(!dir.path().join("task_statistics.None.FATAL").exists());
    }

    #[test]
    fn test_file_sink_swallows_write_failures() {
        let sink = FileOutcomeSink::new("/nonexistent/path/for/sure");
        // Must not panic or propagate.
        sink.record(Some("SITE_A"), Outcome::Ok, "1");
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemoryOutcomeSink::new();
        sink.record(Some("SITE_A"), Outcome::Ok, "1");
        sink.record(None, Outcome::Fatal, "2");
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Some("SITE_A".to_string()), Outcome::Ok, "1".to_string()));
        assert_eq!(records[1], (None, Outcome::Fatal, "2".to_string()));
    }
}
