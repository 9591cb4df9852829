//! The stable Engine API (spec §6): the five entry points every external
//! collaborator (CLI, HTTP service, CI integration) is built against.
//!
//! `Engine` owns the swappable, immutable [`IndexHandle`] the way the
//! teacher's [`crate::orchestrator::Orchestrator`] owns a provider and
//! framework pair: built once per `build_index` call, read by every other
//! method without synchronization beyond the top-level swap (spec §5:
//! "Any rebuild produces a new object; pointer swap is atomic under a
//! top-level engine lock").

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::change_resolver::{self, AffectedTest, ChangeSet, DiffInput};
use crate::config::{EngineOptions, SolutionDescriptor};
use crate::coverage::{CoverageEntry, CoverageIndex, CoverageOptions};
use crate::error::{EngineError, EngineResult, Warning, WithWarnings};
use crate::history::{ExecutionResult, HistoryLog};
use crate::method_id::MethodId;
use crate::selector::{self, ConfidenceLevel, ExecutionPlan, SelectionOptions};
use crate::source::{self, CallGraph, SourceIndex};
use crate::test_registry::{TestCategory, TestRegistry};

/// The immutable, built-once bundle of indices every query method reads
/// from (spec §3's "Ownership": `SourceIndex` owns records, `CallGraph` and
/// `CoverageIndex` hold ids and look up through it; all four are immutable
/// after build).
pub struct IndexHandle {
    pub source: SourceIndex,
    pub graph: CallGraph,
    pub registry: TestRegistry,
    pub coverage: CoverageIndex,
    pub history: Arc<HistoryLog>,
    pub options: EngineOptions,
    pub warnings: Vec<Warning>,
}

impl IndexHandle {
    fn empty(options: EngineOptions, history: Arc<HistoryLog>) -> Self {
        Self {
            source: SourceIndex::default(),
            graph: CallGraph::new(),
            registry: TestRegistry::default(),
            coverage: CoverageIndex::default(),
            history,
            options,
            warnings: Vec::new(),
        }
    }
}

/// Translates `EngineOptions` (the TOML-deserializable schema) into the
/// narrower option structs each subsystem actually consumes.
fn coverage_options(options: &EngineOptions) -> CoverageOptions {
    CoverageOptions {
        max_depth: options.max_depth,
        decay_per_hop: options.decay_per_hop,
        framework_penalty: options.framework_penalty,
    }
}

fn parse_categories(names: &std::collections::HashSet<String>, warnings: &mut Vec<Warning>) -> Vec<TestCategory> {
    names
        .iter()
        .filter_map(|name| match TestCategory::parse(name) {
            Some(category) => Some(category),
            None => {
                warnings.push(Warning::ParseFailure {
                    project: "<config>".to_string(),
                    details: format!("unrecognized test category '{name}'"),
                });
                None
            }
        })
        .collect()
}

fn category_mix_override(
    mix: &Option<Vec<(String, f64)>>,
    warnings: &mut Vec<Warning>,
) -> Option<Vec<(TestCategory, f64)>> {
    let mix = mix.as_ref()?;
    let resolved: Vec<(TestCategory, f64)> = mix
        .iter()
        .filter_map(|(name, fraction)| match TestCategory::parse(name) {
            Some(category) => Some((category, *fraction)),
            None => {
                warnings.push(Warning::ParseFailure {
                    project: "<config>".to_string(),
                    details: format!("unrecognized test category '{name}' in category_mix"),
                });
                None
            }
        })
        .collect();
    if resolved.is_empty() { None } else { Some(resolved) }
}

fn selection_options(options: &EngineOptions, warnings: &mut Vec<Warning>) -> SelectionOptions {
    SelectionOptions {
        include_flaky: options.include_flaky,
        included_categories: parse_categories(&options.included_categories, warnings),
        excluded_categories: parse_categories(&options.excluded_categories, warnings),
        required_tags: options.required_tags.iter().cloned().collect(),
        excluded_tags: options.excluded_tags.iter().cloned().collect(),
        max_tests_override: options.max_tests,
        max_duration_override: options.max_duration_secs.map(std::time::Duration::from_secs),
        min_score_override: options.min_score,
        category_mix_override: category_mix_override(&options.category_mix, warnings),
        max_parallelism: Some(options.max_parallelism as usize),
        history_window: options.history_window as usize,
    }
}

/// Top-level engine: owns the current `IndexHandle` and the `HistoryLog`
/// path it persists results to, if any.
pub struct Engine {
    handle: RwLock<Arc<IndexHandle>>,
    history_path: Option<PathBuf>,
}

impl Engine {
    /// A fresh engine with an empty index and an in-memory-only history log.
    pub fn new() -> Self {
        let history = Arc::new(HistoryLog::new());
        Self {
            handle: RwLock::new(Arc::new(IndexHandle::empty(EngineOptions::default(), history))),
            history_path: None,
        }
    }

    /// An engine that loads/persists `HistoryLog` at `history_path` (spec
    /// §6's "Persistence" — the newline-delimited on-disk log).
    pub fn with_history_path(history_path: PathBuf) -> EngineResult<Self> {
        let history = Arc::new(HistoryLog::load(&history_path)?);
        Ok(Self {
            handle: RwLock::new(Arc::new(IndexHandle::empty(EngineOptions::default(), history))),
            history_path: Some(history_path),
        })
    }

    /// Returns the currently active handle. Readers never need
    /// synchronization beyond this clone (spec §5: "readers need no
    /// synchronization").
    pub fn handle(&self) -> Arc<IndexHandle> {
        Arc::clone(&self.handle.read().expect("engine handle lock poisoned"))
    }

    /// `build_index(solution_desc) -> IndexHandle | Error` (spec §6).
    ///
    /// Parses `solution`, assembles the call graph, classifies tests, and
    /// computes reverse coverage — then atomically swaps the engine's
    /// active handle. A previously active handle remains valid and usable
    /// by anyone still holding an `Arc` to it (spec §5: "a rebuild produces
    /// a new object; pointer swap is atomic").
    pub fn build_index(
        &self,
        solution: &SolutionDescriptor,
        options: EngineOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<WithWarnings<Arc<IndexHandle>>> {
        if solution.projects.is_empty() {
            return Err(EngineError::InvalidInput("solution has no projects".to_string()));
        }

        let mut warnings = Vec::new();
        let history = Arc::clone(&self.handle().history);

        info!(projects = solution.projects.len(), "building source index");
        let built = source::build(solution, cancel)?;
        let (source_index, graph) = built.value;
        warnings.extend(built.warnings);
        cancel.check()?;

        let registry = TestRegistry::build(&source_index, Arc::clone(&history));
        info!(tests = registry.len(), "classified test methods");

        let cov_options = coverage_options(&options);
        let coverage = CoverageIndex::build(&source_index, &graph, cov_options, cancel)?;
        info!(production_methods = coverage.production_method_count(), "built coverage index");

        let handle = Arc::new(IndexHandle {
            source: source_index,
            graph,
            registry,
            coverage,
            history,
            options,
            warnings: warnings.clone(),
        });

        *self.handle.write().expect("engine handle lock poisoned") = Arc::clone(&handle);

        Ok(WithWarnings::with_warnings(handle, warnings))
    }

    /// `get_tests_for_method(handle, MethodId, opts?) -> list<CoverageEntry>`
    /// (spec §6).
    pub fn get_tests_for_method(&self, method: &MethodId) -> Vec<CoverageEntry> {
        self.handle().coverage.tests_for(method).to_vec()
    }

    /// `resolve_changes(handle, DiffInput) -> ChangeSet` (spec §6).
    pub fn resolve_changes(&self, diff: &DiffInput) -> ChangeSet {
        change_resolver::resolve(diff, &self.handle().source)
    }

    /// Dependent tests for a `ChangeSet`, each with the maximum confidence
    /// across the methods it affects (spec §4.4). Exposed alongside `plan`
    /// for callers that want the intermediate affected-test view (e.g. a
    /// CLI's `resolve-changes` subcommand) without running full selection.
    pub fn affected_tests(&self, changes: &ChangeSet) -> Vec<AffectedTest> {
        change_resolver::affected_tests(changes, &self.handle().coverage)
    }

    /// `plan(handle, ChangeSet?, confidence_level, options?) -> ExecutionPlan`
    /// (spec §6). A `None` change set is treated as empty (consistent with
    /// spec §8: "For any ChangeSet with no affected MethodIds, `plan(...)`
    /// returns an empty selection with a non-empty rationale" — `Full`
    /// still selects every eligible test regardless).
    pub fn plan(&self, changes: Option<&ChangeSet>, level: ConfidenceLevel, overrides: Option<&EngineOptions>) -> (ExecutionPlan, Vec<Warning>) {
        let handle = self.handle();
        let empty = ChangeSet::default();
        let changes = changes.unwrap_or(&empty);

        let mut warnings = Vec::new();
        let options = overrides.unwrap_or(&handle.options);
        let selection = selection_options(options, &mut warnings);

        let (plan, select_warnings) = selector::select(&handle.registry, &handle.coverage, changes, level, &selection);
        warnings.extend(select_warnings);
        (plan, warnings)
    }

    /// `record_results(handle, list<ExecutionResult>) -> ()` (spec §6).
    ///
    /// Appends to the shared `HistoryLog` and, if this engine was built
    /// `with_history_path`, persists it to disk immediately (a single
    /// writer under the log's own lock, per spec §5 — no engine-level lock
    /// needed here since `HistoryLog` is already thread-safe).
    pub fn record_results(&self, results: Vec<ExecutionResult>) -> EngineResult<()> {
        let handle = self.handle();
        handle.history.append_all(results);
        if let Some(path) = &self.history_path {
            handle.history.persist(path)?;
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience used by the CLI: runs `build_index` and logs every warning
/// at `warn` level rather than silently dropping them (spec §7: "Users see:
/// a plan, a list of warnings, and at most one fatal error").
pub fn log_warnings(warnings: &[Warning]) {
    for warning in warnings {
        warn!("{warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectDescriptor;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn solution_with(dir: &tempfile::TempDir) -> SolutionDescriptor {
        let path = write_temp(
            dir,
            "Calc.cs",
            r#"
            namespace Acme.Math {
                public class Calculator {
                    public int Add(int a, int b) => a + b;
                }
                public class CalculatorTests {
                    [Test]
                    public void AddsTwoNumbers() {
                        new Calculator().Add(1, 2);
                    }
                }
            }
            "#,
        );
        SolutionDescriptor {
            projects: vec![ProjectDescriptor {
                path: PathBuf::from("Acme.csproj"),
                framework_tag: Some("net8.0".to_string()),
                source_files: vec![path],
                references: vec![],
            }],
        }
    }

    #[test]
    fn build_index_then_query_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let solution = solution_with(&dir);
        let engine = Engine::new();
        let cancel = CancellationToken::new();

        let built = engine.build_index(&solution, EngineOptions::default(), &cancel).unwrap();
        assert!(built.value.registry.len() >= 1);

        let add_id = built
            .value
            .source
            .records()
            .find(|m| m.display_name.ends_with("Add"))
            .unwrap()
            .id
            .clone();

        let entries = engine.get_tests_for_method(&add_id);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].test.as_str().ends_with("AddsTwoNumbers()"));
    }

    #[test]
    fn empty_solution_is_invalid_input() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        let result = engine.build_index(&SolutionDescriptor::default(), EngineOptions::default(), &cancel);
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn plan_with_no_changes_is_empty_with_rationale() {
        let dir = tempfile::tempdir().unwrap();
        let solution = solution_with(&dir);
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        engine.build_index(&solution, EngineOptions::default(), &cancel).unwrap();

        let (plan, _) = engine.plan(None, ConfidenceLevel::Fast, None);
        assert!(plan.tests.is_empty());
        assert!(!plan.rationale.is_empty());
    }

    #[test]
    fn record_results_persists_to_disk_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let history_path = dir.path().join("history.ndjson");
        let engine = Engine::with_history_path(history_path.clone()).unwrap();

        engine
            .record_results(vec![ExecutionResult {
                test_id: MethodId::new("Tests.T()"),
                passed: true,
                duration: std::time::Duration::from_millis(10),
                at: chrono::Utc::now(),
            }])
            .unwrap();

        assert!(history_path.exists());
        let reloaded = HistoryLog::load(&history_path).unwrap();
        assert_eq!(reloaded.pass_rate(&MethodId::new("Tests.T()"), 30), Some(1.0));
    }

    #[test]
    fn plan_end_to_end_with_resolved_changes() {
        let dir = tempfile::tempdir().unwrap();
        let solution = solution_with(&dir);
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        engine.build_index(&solution, EngineOptions::default(), &cancel).unwrap();

        let handle = engine.handle();
        let add = handle.source.records().find(|m| m.display_name.ends_with("Add")).unwrap();
        let diff = DiffInput::Hunks(vec![crate::change_resolver::RawHunk {
            file_path: add.source_path.clone(),
            line_range: (add.start_line, add.end_line),
            change_kind: crate::change_resolver::ChangeKind::Modified,
        }]);

        let changes = engine.resolve_changes(&diff);
        assert!(!changes.is_empty());

        let (plan, _) = engine.plan(Some(&changes), ConfidenceLevel::Full, None);
        assert_eq!(plan.tests.len(), 1);
    }
}
