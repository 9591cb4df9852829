//! `HistoryLog`: an append-only record of prior test executions with
//! rolling pass-rate, average-duration, and flakiness queries.
//!
//! Attempt tracking lives behind an `RwLock<HashMap<...>>`, flakiness is
//! derived from a pass/fail mix within a window, and the log persists to
//! disk in a newline-delimited format via a load/append/persist cycle
//! mirroring a load-from-disk/save-to-disk cache shape.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::method_id::MethodId;

/// One completed test execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub test_id: MethodId,
    pub passed: bool,
    pub duration: Duration,
    pub at: DateTime<Utc>,
}

impl ExecutionResult {
    fn to_line(&self) -> String {
        format!(
            "{} | {} | {} | {}",
            self.test_id,
            if self.passed { 1 } else { 0 },
            self.duration.as_millis(),
            self.at.to_rfc3339(),
        )
    }

    fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(4, '|').map(str::trim);
        let test_id = MethodId::new(parts.next()?.to_string());
        let passed = parts.next()? == "1";
        let duration_ms: u64 = parts.next()?.parse().ok()?;
        let at = DateTime::parse_from_rfc3339(parts.next()?).ok()?.with_timezone(&Utc);
        Some(Self { test_id, passed, duration: Duration::from_millis(duration_ms), at })
    }
}

/// Thread-safe, single-writer/multiple-reader append-only log. A lock on
/// append; queries operate on a snapshot.
///
/// Newest records are kept at the front of each test's run list so rolling
/// queries over "the last N executions" don't need to re-sort on every
/// call.
#[derive(Debug, Default)]
pub struct HistoryLog {
    runs: RwLock<HashMap<MethodId, Vec<ExecutionResult>>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a log from the newline-delimited on-disk format. Lines that
    /// fail to parse are skipped rather than failing the whole load — the
    /// log is a best-effort cache of history, not authoritative state.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let log = Self::new();
        if !path.exists() {
            return Ok(log);
        }
        let content = std::fs::read_to_string(path)?;
        let mut runs = log.runs.write().map_err(|_| EngineError::Internal("history log lock poisoned".into()))?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(result) = ExecutionResult::parse_line(line) {
                runs.entry(result.test_id.clone()).or_default().push(result);
            }
        }
        for entries in runs.values_mut() {
            entries.sort_by(|a, b| b.at.cmp(&a.at));
        }
        drop(runs);
        Ok(log)
    }

    /// Appends `result` in memory. Use [`HistoryLog::append_all`] plus
    /// [`HistoryLog::persist`] to also write through to disk.
    pub fn append(&self, result: ExecutionResult) {
        let mut runs = self.runs.write().expect("history log lock poisoned");
        let entries = runs.entry(result.test_id.clone()).or_default();
        entries.insert(0, result);
    }

    pub fn append_all(&self, results: impl IntoIterator<Item = ExecutionResult>) {
        for result in results {
            self.append(result);
        }
    }

    /// Rewrites `path` with every in-memory record, newest first per test.
    /// Append-only in spirit: existing on-disk history is only ever
    /// superseded by a superset that still contains it (callers load, append,
    /// then persist — never persist a log with fewer records than the file).
    pub fn persist(&self, path: &Path) -> EngineResult<()> {
        let runs = self.runs.read().map_err(|_| EngineError::Internal("history log lock poisoned".into()))?;
        let mut lines = Vec::new();
        for entries in runs.values() {
            // `entries` is already newest-first (see `append`); keep that
            // order on disk instead of reversing it, so a hand-inspected
            // ndjson file matches the in-memory ordering this type documents.
            for result in entries.iter() {
                lines.push(result.to_line());
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, lines.join("\n"))?;
        Ok(())
    }

    /// Compacts the in-memory log to the last `keep` records per test.
    pub fn compact(&self, keep: usize) {
        let mut runs = self.runs.write().expect("history log lock poisoned");
        for entries in runs.values_mut() {
            entries.truncate(keep);
        }
    }

    /// Last `n` executions for `test_id`, newest first.
    pub fn last_n(&self, test_id: &MethodId, n: usize) -> Vec<ExecutionResult> {
        let runs = self.runs.read().expect("history log lock poisoned");
        runs.get(test_id).map(|entries| entries.iter().take(n).cloned().collect()).unwrap_or_default()
    }

    /// Rolling pass rate over the last `window` executions. `None` if there
    /// is no history — the historical scorer treats unknown as neutral,
    /// not zero.
    pub fn pass_rate(&self, test_id: &MethodId, window: usize) -> Option<f64> {
        let runs = self.last_n(test_id, window);
        if runs.is_empty() {
            return None;
        }
        let passed = runs.iter().filter(|r| r.passed).count();
        Some(passed as f64 / runs.len() as f64)
    }

    /// Rolling average duration over the last `window` executions.
    pub fn avg_duration(&self, test_id: &MethodId, window: usize) -> Option<Duration> {
        let runs = self.last_n(test_id, window);
        if runs.is_empty() {
            return None;
        }
        let total: Duration = runs.iter().map(|r| r.duration).sum();
        Some(total / runs.len() as u32)
    }

    /// A test is flaky if, within the window, it has both a pass and a
    /// failure.
    pub fn is_flaky(&self, test_id: &MethodId, window: usize) -> bool {
        let runs = self.last_n(test_id, window);
        let has_pass = runs.iter().any(|r| r.passed);
        let has_fail = runs.iter().any(|r| !r.passed);
        has_pass && has_fail
    }

    /// Convenience combining [`HistoryLog::avg_duration`] and
    /// [`HistoryLog::is_flaky`] with the fixed 30-run default window, used
    /// when seeding a freshly built `TestRecord`.
    pub fn rolling_stats(&self, test_id: &MethodId) -> (Duration, bool) {
        const DEFAULT_WINDOW: usize = 30;
        (self.avg_duration(test_id, DEFAULT_WINDOW).unwrap_or_default(), self.is_flaky(test_id, DEFAULT_WINDOW))
    }
}
