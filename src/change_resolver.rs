//! `ChangeResolver`: maps textual diffs to affected `MethodId`s.
//!
//! Ships a baseline unified-diff hunk-header reader alongside the
//! structured `DiffInput::Hunks` form. A full, general-purpose diff/patch
//! parser is out of scope, but `ChangeResolver` cannot function without
//! turning *some* form of `DiffInput` into line ranges, so a reader for the
//! common `@@ -l,s +l,s @@` shape is in scope.

use std::collections::{HashSet, hash_map::DefaultHasher};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageIndex;
use crate::method_id::MethodId;
use crate::source::SourceIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One resolved source change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: PathBuf,
    pub change_kind: ChangeKind,
    pub line_range: (u32, u32),
    pub changed_methods: HashSet<MethodId>,
    pub changed_types: HashSet<String>,
}

/// A finite set of `CodeChange`s with a content hash over the
/// `(file, range)` tuples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<CodeChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// All methods affected across every change in this set.
    pub fn affected_methods(&self) -> HashSet<MethodId> {
        self.changes.iter().flat_map(|c| c.changed_methods.iter().cloned()).collect()
    }

    /// Content hash over the `(file, range)` tuples, stable across process
    /// runs (a plain `std::hash::Hasher`, not a cryptographic digest — a
    /// change set only needs a cheap identity, not tamper resistance).
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut sorted: Vec<&CodeChange> = self.changes.iter().collect();
        sorted.sort_by(|a, b| (&a.file_path, a.line_range).cmp(&(&b.file_path, b.line_range)));
        for change in sorted {
            change.file_path.hash(&mut hasher);
            change.line_range.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// One `(file, range, kind)` hunk, prior to method resolution.
#[derive(Debug, Clone)]
pub struct RawHunk {
    pub file_path: PathBuf,
    pub line_range: (u32, u32),
    pub change_kind: ChangeKind,
}

/// Input to [`resolve`]: either a structured hunk list or a unified-diff
/// string.
#[derive(Debug, Clone)]
pub enum DiffInput {
    Hunks(Vec<RawHunk>),
    UnifiedDiff(String),
}

static RE_DIFF_GIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(\S+) b/(\S+)").unwrap());
static RE_HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@").unwrap());
static RE_NEW_FILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^new file mode").unwrap());
static RE_DELETED_FILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^deleted file mode").unwrap());
static RE_RENAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^rename to (\S+)").unwrap());

/// Reads the common unified-diff shape: `diff --git` file headers and
/// `@@ -l,s +l,s @@` hunk headers give `(file, (start,end))` ranges. This is
/// intentionally not a full patch parser (no binary-diff handling, no
/// `\ No newline at end of file` edge cases) — a baseline reader for
/// resolving the common case, per this module's doc comment.
pub fn parse_unified_diff(diff: &str) -> Vec<RawHunk> {
    let mut hunks = Vec::new();
    let mut current_file: Option<PathBuf> = None;
    let mut current_kind = ChangeKind::Modified;

    for line in diff.lines() {
        if let Some(caps) = RE_DIFF_GIT.captures(line) {
            current_file = Some(PathBuf::from(&caps[2]));
            current_kind = ChangeKind::Modified;
            continue;
        }
        if RE_NEW_FILE.is_match(line) {
            current_kind = ChangeKind::Added;
            continue;
        }
        if RE_DELETED_FILE.is_match(line) {
            current_kind = ChangeKind::Deleted;
            continue;
        }
        if let Some(caps) = RE_RENAME.captures(line) {
            current_file = Some(PathBuf::from(&caps[1]));
            current_kind = ChangeKind::Renamed;
            continue;
        }
        if let Some(caps) = RE_HUNK_HEADER.captures(line) {
            let Some(file_path) = current_file.clone() else { continue };
            let start: u32 = caps[1].parse().unwrap_or(0);
            let len: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
            let end = start + len.saturating_sub(1);
            hunks.push(RawHunk { file_path, line_range: (start, end.max(start)), change_kind: current_kind });
        }
    }

    hunks
}

fn hunks_of(input: &DiffInput) -> Vec<RawHunk> {
    match input {
        DiffInput::Hunks(hunks) => hunks.clone(),
        DiffInput::UnifiedDiff(text) => parse_unified_diff(text),
    }
}

/// Resolves `input` against `index`, mapping each hunk to the enclosing
/// method(s).
///
/// For each hunk, scans the `MethodRecord`s of that file (pre-indexed by
/// `SourceIndex`, sorted by `start_line`) and selects records whose
/// `[start_line, end_line]` overlaps the hunk. Adds/deletes expand to the
/// enclosing type's methods when no method contains the range (a hunk
/// outside any method body, e.g. a new field or a whole added/removed type).
pub fn resolve(input: &DiffInput, index: &SourceIndex) -> ChangeSet {
    let mut changes = Vec::new();

    for hunk in hunks_of(input) {
        let candidates = index.methods_in_file(&hunk.file_path);
        let mut changed_methods: HashSet<MethodId> = HashSet::new();
        let mut changed_types: HashSet<String> = HashSet::new();

        for id in candidates {
            let Some(record) = index.get(id) else { continue };
            if record.overlaps(hunk.line_range.0, hunk.line_range.1) {
                changed_methods.insert(id.clone());
                changed_types.insert(record.declaring_type.clone());
            }
        }

        if changed_methods.is_empty() && matches!(hunk.change_kind, ChangeKind::Added | ChangeKind::Deleted) {
            // No method directly contains the range: fall back to every
            // method declared in the file, treating the hunk as touching
            // the enclosing type(s) wholesale.
            for id in candidates {
                if let Some(record) = index.get(id) {
                    changed_methods.insert(id.clone());
                    changed_types.insert(record.declaring_type.clone());
                }
            }
        }

        changes.push(CodeChange {
            file_path: hunk.file_path,
            change_kind: hunk.change_kind,
            line_range: hunk.line_range,
            changed_methods,
            changed_types,
        });
    }

    ChangeSet { changes }
}

/// A test affected by a `ChangeSet`, with the maximum confidence observed
/// across every affected method it covers. A test retains the maximum
/// confidence across all paths through which it was matched.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectedTest {
    pub test: MethodId,
    pub confidence: f64,
}

/// Dependent tests = `⋃_p tests_for(p)` for each affected production
/// method `p`, de-duplicated, keeping the max confidence per test.
pub fn affected_tests(changes: &ChangeSet, coverage: &CoverageIndex) -> Vec<AffectedTest> {
    let mut best: std::collections::HashMap<MethodId, f64> = std::collections::HashMap::new();

    for production in changes.affected_methods() {
        for entry in coverage.tests_for(&production) {
            best.entry(entry.test.clone())
                .and_modify(|c| *c = c.max(entry.confidence))
                .or_insert(entry.confidence);
        }
    }

    let mut result: Vec<AffectedTest> = best.into_iter().map(|(test, confidence)| AffectedTest { test, confidence }).collect();
    result.sort_by(|a, b| a.test.cmp(&b.test));
    result
}
