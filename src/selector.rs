//! `Selector`: builds a bounded `ExecutionPlan` under a confidence-level
//! policy.
//!
//! Batching is a duration-aware generalization of round-robin/batch-size
//! test distribution: a greedy longest-processing-time-first (LPT) bin
//! pack across `P` batches, where `P = min(max_parallelism, len(tests))`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::change_resolver::ChangeSet;
use crate::coverage::CoverageIndex;
use crate::error::Warning;
use crate::method_id::MethodId;
use crate::scorer::{CompositeScorer, ScoringContext};
use crate::test_registry::{TestCategory, TestRecord, TestRegistry};

/// The closed confidence-level set, each with a default policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Fast,
    Medium,
    High,
    Full,
}

/// The resolved policy for a confidence level: count cap, time budget,
/// minimum score, and (only for `Fast` by default) a category mix.
#[derive(Debug, Clone)]
pub struct LevelPolicy {
    pub max_tests: Option<usize>,
    pub max_duration: Option<Duration>,
    pub min_score: f64,
    /// `(category, fraction)` pairs that partition pre-allocated slots
    /// before the single-pass fill; `None` means a single pass over every
    /// category.
    pub category_mix: Option<Vec<(TestCategory, f64)>>,
}

impl ConfidenceLevel {
    /// The defaults table for each confidence level.
    pub fn default_policy(self) -> LevelPolicy {
        match self {
            ConfidenceLevel::Fast => LevelPolicy {
                max_tests: Some(50),
                max_duration: Some(Duration::from_secs(120)),
                min_score: 0.50,
                category_mix: Some(vec![(TestCategory::Unit, 0.8), (TestCategory::Integration, 0.2)]),
            },
            ConfidenceLevel::Medium => LevelPolicy {
                max_tests: Some(300),
                max_duration: Some(Duration::from_secs(600)),
                min_score: 0.40,
                category_mix: None,
            },
            ConfidenceLevel::High => LevelPolicy {
                max_tests: Some(1500),
                max_duration: Some(Duration::from_secs(2700)),
                min_score: 0.20,
                category_mix: None,
            },
            ConfidenceLevel::Full => {
                LevelPolicy { max_tests: None, max_duration: None, min_score: 0.0, category_mix: None }
            }
        }
    }
}

/// Selection knobs layered on top of a confidence level's defaults:
/// configuration-option overrides, plus category/tag filters.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    pub include_flaky: bool,
    pub included_categories: Vec<TestCategory>,
    pub excluded_categories: Vec<TestCategory>,
    pub required_tags: Vec<String>,
    pub excluded_tags: Vec<String>,
    pub max_tests_override: Option<usize>,
    pub max_duration_override: Option<Duration>,
    pub min_score_override: Option<f64>,
    /// Overrides `Fast`'s default 80/20 unit/integration slot split (spec's
    /// Open Question: "may be configurable; implementers should expose it
    /// as an option"). Ignored by levels whose default policy has no mix.
    pub category_mix_override: Option<Vec<(TestCategory, f64)>>,
    pub max_parallelism: Option<usize>,
    pub history_window: usize,
}

/// A scored, selectable test — the Selector's working unit before the
/// final `ExecutionPlan` is assembled.
#[derive(Debug, Clone)]
struct ScoredTest {
    record: TestRecord,
    score: f64,
}

/// A bounded execution plan. Invariants: `sum(test.avg_execution) <=
/// max_duration`, `len(tests) <= max_tests`, each test appears exactly
/// once, batches partition `tests`.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub tests: Vec<TestRecord>,
    pub batches: Vec<Vec<TestRecord>>,
    pub estimated_duration: Duration,
    pub confidence_level: ConfidenceLevel,
    pub rationale: String,
}

impl ExecutionPlan {
    fn empty(level: ConfidenceLevel, rationale: impl Into<String>) -> Self {
        Self { tests: Vec::new(), batches: Vec::new(), estimated_duration: Duration::ZERO, confidence_level: level, rationale: rationale.into() }
    }
}

fn category_filter_ok(category: TestCategory, options: &SelectionOptions) -> bool {
    if !options.included_categories.is_empty() && !options.included_categories.contains(&category) {
        return false;
    }
    if options.excluded_categories.contains(&category) {
        return false;
    }
    true
}

fn tag_filter_ok(tags: &std::collections::HashSet<String>, options: &SelectionOptions) -> bool {
    if !options.required_tags.iter().all(|t| tags.contains(t)) {
        return false;
    }
    if options.excluded_tags.iter().any(|t| tags.contains(t)) {
        return false;
    }
    true
}

/// Builds an `ExecutionPlan` for `level` from every test in `registry`,
/// scored against `changes`.
pub fn select(
    registry: &TestRegistry,
    coverage: &CoverageIndex,
    changes: &ChangeSet,
    level: ConfidenceLevel,
    options: &SelectionOptions,
) -> (ExecutionPlan, Vec<Warning>) {
    let policy = level.default_policy();
    let max_tests = options.max_tests_override.or(policy.max_tests);
    let max_duration = options.max_duration_override.or(policy.max_duration);
    let min_score = options.min_score_override.unwrap_or(policy.min_score);

    let mut warnings = Vec::new();
    let affected_methods = changes.affected_methods();

    if level != ConfidenceLevel::Full && affected_methods.is_empty() {
        return (ExecutionPlan::empty(level, "no affected methods".to_string()), warnings);
    }

    let eligible: Vec<&TestRecord> = registry
        .tests()
        .filter(|t| category_filter_ok(t.category, options))
        .filter(|t| tag_filter_ok(&t.tags, options))
        .filter(|t| !t.is_flaky || options.include_flaky)
        .collect();

    if eligible.is_empty() {
        return (ExecutionPlan::empty(level, "no tests passed category/tag/flakiness filters".to_string()), warnings);
    }

    if level == ConfidenceLevel::Full {
        let tests: Vec<TestRecord> = eligible.into_iter().cloned().collect();
        return finish_plan(tests, level, max_duration, options, "full run: every eligible test selected".to_string());
    }

    let max_duration_ms = eligible.iter().map(|t| t.avg_execution.as_millis() as f64).fold(0.0, f64::max);
    let composite = CompositeScorer::default();

    let mut scored: Vec<ScoredTest> = Vec::with_capacity(eligible.len());
    for test in eligible {
        let ctx = ScoringContext {
            affected_methods: &affected_methods,
            coverage,
            history_window: options.history_window,
            max_duration_ms,
        };
        let (score, score_warnings) = composite.score(test, &ctx);
        warnings.extend(score_warnings);
        scored.push(ScoredTest { record: test.clone(), score });
    }

    // Sort by composite score descending; ties broken by MethodId so the
    // resulting plan's test ordering is itself deterministic.
    scored.sort_by(|a, b| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.record.id().cmp(b.record.id()))
    });

    let effective_mix = options.category_mix_override.as_ref().or(policy.category_mix.as_ref());
    let selected = match effective_mix {
        Some(mix) => select_with_category_mix(&scored, mix, max_tests, max_duration, min_score),
        None => select_single_pass(&scored, max_tests, max_duration, min_score),
    };

    if selected.is_empty() {
        return (
            ExecutionPlan::empty(level, format!("no test met the minimum composite score of {min_score:.2}")),
            warnings,
        );
    }

    let rationale = format!("selected {} of {} scored tests at confidence level {:?}", selected.len(), scored.len(), level);
    let (plan, finish_warnings) = finish_plan(selected, level, max_duration, options, rationale);
    warnings.extend(finish_warnings);
    (plan, warnings)
}

/// Single-pass admission: walk tests in score order, admit while every
/// admission rule holds.
fn select_single_pass(scored: &[ScoredTest], max_tests: Option<usize>, max_duration: Option<Duration>, min_score: f64) -> Vec<TestRecord> {
    let mut selected = Vec::new();
    let mut cumulative = Duration::ZERO;

    for candidate in scored {
        if candidate.score < min_score {
            continue;
        }
        if let Some(cap) = max_tests {
            if selected.len() >= cap {
                break;
            }
        }
        if let Some(budget) = max_duration {
            if cumulative + candidate.record.avg_execution > budget {
                continue;
            }
        }
        cumulative += candidate.record.avg_execution;
        selected.push(candidate.record.clone());
    }

    selected
}

/// `Fast`'s allocation: pre-allocate slots per `mix` (e.g. 80% Unit, 20%
/// Integration), fill each category's slice in score order, then fill any
/// remaining slots from the global sorted list.
fn select_with_category_mix(
    scored: &[ScoredTest],
    mix: &[(TestCategory, f64)],
    max_tests: Option<usize>,
    max_duration: Option<Duration>,
    min_score: f64,
) -> Vec<TestRecord> {
    let Some(total_cap) = max_tests else {
        return select_single_pass(scored, max_tests, max_duration, min_score);
    };

    let mut selected = Vec::new();
    let mut cumulative = Duration::ZERO;
    let mut taken: std::collections::HashSet<MethodId> = std::collections::HashSet::new();

    for (category, fraction) in mix {
        let slot_count = ((total_cap as f64) * fraction).round() as usize;
        let mut filled = 0usize;
        for candidate in scored {
            if filled >= slot_count || selected.len() >= total_cap {
                break;
            }
            if taken.contains(candidate.record.id()) {
                continue;
            }
            if candidate.record.category != *category {
                continue;
            }
            if candidate.score < min_score {
                continue;
            }
            if let Some(budget) = max_duration {
                if cumulative + candidate.record.avg_execution > budget {
                    continue;
                }
            }
            cumulative += candidate.record.avg_execution;
            taken.insert(candidate.record.id().clone());
            selected.push(candidate.record.clone());
            filled += 1;
        }
    }

    // Fill any remaining slots from the global sorted list, regardless of
    // category.
    for candidate in scored {
        if selected.len() >= total_cap {
            break;
        }
        if taken.contains(candidate.record.id()) {
            continue;
        }
        if candidate.score < min_score {
            continue;
        }
        if let Some(budget) = max_duration {
            if cumulative + candidate.record.avg_execution > budget {
                continue;
            }
        }
        cumulative += candidate.record.avg_execution;
        taken.insert(candidate.record.id().clone());
        selected.push(candidate.record.clone());
    }

    selected
}

fn finish_plan(
    tests: Vec<TestRecord>,
    level: ConfidenceLevel,
    max_duration: Option<Duration>,
    options: &SelectionOptions,
    rationale: String,
) -> (ExecutionPlan, Vec<Warning>) {
    let warnings = Vec::new();
    let estimated_duration: Duration = tests.iter().map(|t| t.avg_execution).sum();
    let _ = max_duration;

    let parallelism = options.max_parallelism.unwrap_or(1).max(1);
    let batches = batch_lpt(&tests, parallelism);

    (ExecutionPlan { tests, batches, estimated_duration, confidence_level: level, rationale }, warnings)
}

/// Greedy longest-processing-time-first bin pack into `P = min(max_parallelism,
/// len(tests))` batches.
fn batch_lpt(tests: &[TestRecord], max_parallelism: usize) -> Vec<Vec<TestRecord>> {
    if tests.is_empty() {
        return Vec::new();
    }

    let p = max_parallelism.min(tests.len()).max(1);
    let mut order: Vec<&TestRecord> = tests.iter().collect();
    order.sort_by(|a, b| b.avg_execution.cmp(&a.avg_execution).then_with(|| a.id().cmp(b.id())));

    let mut batches: Vec<Vec<TestRecord>> = vec![Vec::new(); p];
    let mut batch_durations: Vec<Duration> = vec![Duration::ZERO; p];

    for test in order {
        let (idx, _) = batch_durations
            .iter()
            .enumerate()
            .min_by_key(|(_, d)| **d)
            .expect("batches is non-empty");
        batch_durations[idx] += test.avg_execution;
        batches[idx].push(test.clone());
    }

    batches.retain(|b| !b.is_empty());
    batches
}

/// Answers `get_tests_for_method`: every `CoverageEntry` for a production
/// method, resolved to full `TestRecord`s where the test is still known to
/// the registry.
pub fn tests_for_method<'a>(coverage: &'a CoverageIndex, registry: &'a TestRegistry, production: &MethodId) -> Vec<(&'a TestRecord, f64)> {
    coverage
        .tests_for(production)
        .iter()
        .filter_map(|entry| registry.get(&entry.test).map(|record| (record, entry.confidence)))
        .collect()
}

/// Per-category counts, used by callers/tests asserting the Fast level's
/// mix was honored.
pub fn category_counts(tests: &[TestRecord]) -> HashMap<TestCategory, usize> {
    let mut counts = HashMap::new();
    for test in tests {
        *counts.entry(test.category).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::coverage::CoverageOptions;
    use crate::history::HistoryLog;
    use crate::source::callgraph::CallGraph;
    use crate::source::{MethodRecord, SourceIndex, TestFramework};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_method(id_str: &str, declaring_type: &str, category_hint: Option<&str>) -> MethodRecord {
        MethodRecord {
            id: MethodId::new(id_str),
            display_name: id_str.to_string(),
            declaring_type: declaring_type.to_string(),
            source_path: PathBuf::from("Tests.cs"),
            start_line: 1,
            end_line: 2,
            is_test: true,
            framework: TestFramework::NUnit,
            attributes: ["Test".to_string()].into_iter().collect(),
            framework_version_tag: None,
            category_hint: category_hint.map(str::to_string),
        }
    }

    fn build_fixture(n_unit: usize, n_integration: usize) -> (TestRegistry, CoverageIndex, ChangeSet) {
        let mut records = Vec::new();
        let mut graph = CallGraph::new();
        for i in 0..n_unit {
            let id = format!("Tests.Unit{i}()");
            records.push(test_method(&id, "UnitTests", Some("Unit")));
            graph.add_edge(MethodId::new(id), MethodId::new("Prod.Target()"));
        }
        for i in 0..n_integration {
            let id = format!("Tests.Integration{i}()");
            records.push(test_method(&id, "IntegrationTests", Some("Integration")));
            graph.add_edge(MethodId::new(id), MethodId::new("Prod.Target()"));
        }

        let index = SourceIndex::from_records(records);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();
        let history = Arc::new(HistoryLog::new());
        let registry = TestRegistry::build(&index, history);

        let mut changes = ChangeSet::default();
        changes.changes.push(crate::change_resolver::CodeChange {
            file_path: PathBuf::from("Prod.cs"),
            change_kind: crate::change_resolver::ChangeKind::Modified,
            line_range: (1, 1),
            changed_methods: [MethodId::new("Prod.Target()")].into_iter().collect(),
            changed_types: Default::default(),
        });

        (registry, coverage, changes)
    }

    #[test]
    fn empty_change_set_yields_empty_plan_with_rationale() {
        let (registry, coverage, _) = build_fixture(5, 0);
        let empty_changes = ChangeSet::default();
        let (plan, _) = select(&registry, &coverage, &empty_changes, ConfidenceLevel::Fast, &SelectionOptions::default());
        assert!(plan.tests.is_empty());
        assert!(!plan.rationale.is_empty());
    }

    #[test]
    fn cap_enforcement_with_category_mix() {
        let (registry, coverage, changes) = build_fixture(1000, 1000);
        let options = SelectionOptions { max_tests_override: Some(50), max_parallelism: Some(4), history_window: 30, ..Default::default() };
        let (plan, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Fast, &options);

        assert_eq!(plan.tests.len(), 50);
        let counts = category_counts(&plan.tests);
        assert_eq!(*counts.get(&TestCategory::Unit).unwrap_or(&0), 40);
        assert_eq!(*counts.get(&TestCategory::Integration).unwrap_or(&0), 10);
    }

    #[test]
    fn category_mix_override_replaces_the_level_default() {
        let (registry, coverage, changes) = build_fixture(1000, 1000);
        let options = SelectionOptions {
            max_tests_override: Some(50),
            category_mix_override: Some(vec![(TestCategory::Unit, 0.5), (TestCategory::Integration, 0.5)]),
            history_window: 30,
            ..Default::default()
        };
        let (plan, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Fast, &options);

        let counts = category_counts(&plan.tests);
        assert_eq!(*counts.get(&TestCategory::Unit).unwrap_or(&0), 25);
        assert_eq!(*counts.get(&TestCategory::Integration).unwrap_or(&0), 25);
    }

    #[test]
    fn max_tests_cap_is_respected_without_mix() {
        let (registry, coverage, changes) = build_fixture(500, 0);
        let options = SelectionOptions { max_tests_override: Some(10), history_window: 30, ..Default::default() };
        let (plan, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Medium, &options);
        assert_eq!(plan.tests.len(), 10);
    }

    #[test]
    fn full_level_ignores_min_score_and_selects_everything_eligible() {
        let (registry, coverage, _changes) = build_fixture(3, 2);
        let empty_changes = ChangeSet::default();
        let (plan, _) = select(&registry, &coverage, &empty_changes, ConfidenceLevel::Full, &SelectionOptions::default());
        assert_eq!(plan.tests.len(), 5);
    }

    #[test]
    fn flaky_tests_excluded_unless_opted_in() {
        let record = test_method("Tests.Flaky()", "UnitTests", Some("Unit"));
        let mut graph = CallGraph::new();
        graph.add_edge(MethodId::new("Tests.Flaky()"), MethodId::new("Prod.Target()"));
        let index = SourceIndex::from_records(vec![record]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        let history = Arc::new(HistoryLog::new());
        history.append(crate::history::ExecutionResult {
            test_id: MethodId::new("Tests.Flaky()"),
            passed: true,
            duration: std::time::Duration::from_millis(10),
            at: chrono::Utc::now(),
        });
        history.append(crate::history::ExecutionResult {
            test_id: MethodId::new("Tests.Flaky()"),
            passed: false,
            duration: std::time::Duration::from_millis(10),
            at: chrono::Utc::now(),
        });
        let registry = TestRegistry::build(&index, history);
        assert!(registry.get(&MethodId::new("Tests.Flaky()")).unwrap().is_flaky);

        let mut changes = ChangeSet::default();
        changes.changes.push(crate::change_resolver::CodeChange {
            file_path: PathBuf::from("Prod.cs"),
            change_kind: crate::change_resolver::ChangeKind::Modified,
            line_range: (1, 1),
            changed_methods: [MethodId::new("Prod.Target()")].into_iter().collect(),
            changed_types: Default::default(),
        });

        let options_default = SelectionOptions { history_window: 30, ..Default::default() };
        let (plan, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Medium, &options_default);
        assert!(plan.tests.is_empty());

        let options_include = SelectionOptions { history_window: 30, include_flaky: true, ..Default::default() };
        let (plan_included, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Medium, &options_include);
        assert_eq!(plan_included.tests.len(), 1);
    }

    #[test]
    fn batches_partition_selected_tests_exactly_once() {
        let (registry, coverage, changes) = build_fixture(20, 0);
        let options = SelectionOptions { max_parallelism: Some(4), history_window: 30, ..Default::default() };
        let (plan, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Medium, &options);

        let mut from_batches: Vec<MethodId> = plan.batches.iter().flatten().map(|t| t.id().clone()).collect();
        let mut from_tests: Vec<MethodId> = plan.tests.iter().map(|t| t.id().clone()).collect();
        from_batches.sort();
        from_tests.sort();
        assert_eq!(from_batches, from_tests);
        assert!(plan.batches.len() <= 4);
    }

    #[test]
    fn deterministic_rerun_produces_identical_plan() {
        let (registry, coverage, changes) = build_fixture(30, 10);
        let options = SelectionOptions { max_tests_override: Some(20), max_parallelism: Some(3), history_window: 30, ..Default::default() };

        let (plan_a, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Fast, &options);
        let (plan_b, _) = select(&registry, &coverage, &changes, ConfidenceLevel::Fast, &options);

        let ids_a: Vec<MethodId> = plan_a.tests.iter().map(|t| t.id().clone()).collect();
        let ids_b: Vec<MethodId> = plan_b.tests.iter().map(|t| t.id().clone()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
