//! `CoverageIndex`: reverse reachability from tests to production methods,
//! with a decayed confidence score.
//!
//! BFS sharding across test methods uses `rayon`'s work-stealing pool, the
//! idiom this crate's graph-traversal workloads favor over a hand-rolled
//! thread pool. Per-test visited frontiers are thread-local (built inside
//! each `rayon` task) and merged with a final reduction, keeping total work
//! near-linear without synchronizing writes mid-traversal.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::EngineResult;
use crate::method_id::MethodId;
use crate::source::callgraph::CallGraph;
use crate::source::SourceIndex;

const FRAMEWORK_NAMESPACE_PREFIXES: &[&str] =
    &["System.", "Microsoft.", "NUnit.", "Xunit.", "JetBrains."];

fn is_framework_method(id: &MethodId) -> bool {
    FRAMEWORK_NAMESPACE_PREFIXES.iter().any(|prefix| id.as_str().starts_with(prefix))
}

/// `confidence = max(0, 1 − d·α − penalty(p))`.
pub fn decay(depth: u32, decay_per_hop: f64, framework_penalty: f64, production: &MethodId) -> f64 {
    let penalty = if is_framework_method(production) { framework_penalty } else { 0.0 };
    (1.0 - depth as f64 * decay_per_hop - penalty).max(0.0)
}

/// A single discovered reach from a test to a production method.
///
/// Invariants: `path[0] == test`, `path.last() == Some(production)`,
/// `0 < depth <= MAX_DEPTH`, `0.0 <= confidence <= 1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub test: MethodId,
    pub production: MethodId,
    pub path: Vec<MethodId>,
    pub depth: u32,
    pub confidence: f64,
}

/// Reverse-reachability index: `production_method -> list<CoverageEntry>`
/// sorted by descending confidence, plus the symmetric `test -> list<MethodId>`
/// view for auditing.
#[derive(Debug, Default)]
pub struct CoverageIndex {
    tests_for: HashMap<MethodId, Vec<CoverageEntry>>,
    methods_for: HashMap<MethodId, Vec<MethodId>>,
}

/// Tunables consumed while building a `CoverageIndex`.
#[derive(Debug, Clone, Copy)]
pub struct CoverageOptions {
    pub max_depth: u32,
    pub decay_per_hop: f64,
    pub framework_penalty: f64,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self { max_depth: 5, decay_per_hop: 0.15, framework_penalty: 0.1 }
    }
}

impl CoverageIndex {
    /// Runs a bounded BFS from every test method in `index` over `graph`,
    /// sharded across `rayon`'s global pool, one shard per test.
    ///
    /// `cancel` is checked at each shard boundary (spec §5: "BFS-batch
    /// boundaries in CoverageIndex" is a mandatory suspension point) — once
    /// tripped, in-flight shards still drain but no new one starts, and the
    /// sequential merge below bails out with `EngineError::Cancelled`
    /// before mutating `self`, the same "checked between, not mid-shard"
    /// granularity `source::build` uses at its own per-file boundary.
    pub fn build(
        index: &SourceIndex,
        graph: &CallGraph,
        options: CoverageOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<Self> {
        let test_ids: Vec<MethodId> = index.records().filter(|m| m.is_test).map(|m| m.id.clone()).collect();

        let per_test: Vec<(MethodId, EngineResult<Vec<CoverageEntry>>)> = test_ids
            .par_iter()
            .map(|test_id| {
                let entries = cancel.check().map(|()| bfs_from_test(test_id, graph, options));
                (test_id.clone(), entries)
            })
            .collect();

        let mut tests_for: HashMap<MethodId, Vec<CoverageEntry>> = HashMap::new();
        let mut methods_for: HashMap<MethodId, Vec<MethodId>> = HashMap::new();

        for (test_id, entries) in per_test {
            cancel.check()?;
            let entries = entries?;
            let mut reached = Vec::with_capacity(entries.len());
            for entry in entries {
                reached.push(entry.production.clone());
                tests_for.entry(entry.production.clone()).or_default().push(entry);
            }
            methods_for.insert(test_id, reached);
        }

        for entries in tests_for.values_mut() {
            // Shortest path wins; on a depth tie, lexicographically smaller
            // test id wins. The per-test tie-break already happens inside
            // `CallGraph::bounded_bfs`; this sort just needs to produce a
            // stable, deterministic overall ordering.
            entries.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.test.cmp(&b.test))
            });
        }
        for reached in methods_for.values_mut() {
            reached.sort();
        }

        Ok(Self { tests_for, methods_for })
    }

    /// `CoverageEntry`s reaching `production`, sorted by descending
    /// confidence.
    pub fn tests_for(&self, production: &MethodId) -> &[CoverageEntry] {
        self.tests_for.get(production).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Production methods reachable from `test`, for auditing.
    pub fn methods_for(&self, test: &MethodId) -> &[MethodId] {
        self.methods_for.get(test).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `coverage_confidence(test, production)`: the confidence of the
    /// specific `(test, production)` pair if it exists, else `0.0` — used
    /// directly by the impact scorer.
    pub fn confidence(&self, test: &MethodId, production: &MethodId) -> f64 {
        self.tests_for(production).iter().find(|e| &e.test == test).map(|e| e.confidence).unwrap_or(0.0)
    }

    pub fn production_method_count(&self) -> usize {
        self.tests_for.len()
    }
}

fn bfs_from_test(test_id: &MethodId, graph: &CallGraph, options: CoverageOptions) -> Vec<CoverageEntry> {
    let reached = graph.bounded_bfs(test_id, options.max_depth);
    let mut entries = Vec::with_capacity(reached.len());

    for (production, (depth, _pred)) in &reached {
        let path = reconstruct_path(test_id, production, &reached);
        let confidence = decay(*depth, options.decay_per_hop, options.framework_penalty, production);
        entries.push(CoverageEntry {
            test: test_id.clone(),
            production: production.clone(),
            path,
            depth: *depth,
            confidence,
        });
    }

    entries
}

/// Walks the BFS predecessor chain from `production` back to `test`,
/// reversing it into `path[0] == test .. path.last() == production`.
fn reconstruct_path(
    test_id: &MethodId,
    production: &MethodId,
    reached: &HashMap<MethodId, (u32, MethodId)>,
) -> Vec<MethodId> {
    let mut path = vec![production.clone()];
    let mut current = production.clone();

    while &current != test_id {
        let Some((_, pred)) = reached.get(&current) else { break };
        path.push(pred.clone());
        current = pred.clone();
        if path.len() > reached.len() + 1 {
            // Defensive bound against a malformed predecessor chain; cannot
            // happen given `bounded_bfs`'s construction, but a corrupted
            // chain must not loop forever.
            break;
        }
    }

    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MethodId {
        MethodId::new(s)
    }

    fn graph_with_edges(edges: &[(&str, &str)]) -> CallGraph {
        let mut g = CallGraph::new();
        for (from, to) in edges {
            g.add_edge(id(from), id(to));
        }
        g
    }

    use crate::source::{MethodRecord, TestFramework};
    use std::path::PathBuf;

    fn test_record(id_str: &str) -> MethodRecord {
        MethodRecord {
            id: id(id_str),
            display_name: id_str.to_string(),
            declaring_type: "Tests".to_string(),
            source_path: PathBuf::from("Tests.cs"),
            start_line: 1,
            end_line: 2,
            is_test: true,
            framework: TestFramework::NUnit,
            attributes: Default::default(),
            framework_version_tag: None,
            category_hint: None,
        }
    }

    #[test]
    fn direct_call_has_depth_one_and_high_confidence() {
        let graph = graph_with_edges(&[("Tests.AddT()", "Calc.Add(Int32,Int32)")]);
        let index = SourceIndex::from_records(vec![test_record("Tests.AddT()")]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        let entries = coverage.tests_for(&id("Calc.Add(Int32,Int32)"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].depth, 1);
        assert!((entries[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(entries[0].path, vec![id("Tests.AddT()"), id("Calc.Add(Int32,Int32)")]);
    }

    #[test]
    fn one_hop_indirect_has_depth_two() {
        let graph = graph_with_edges(&[
            ("Tests.AddT()", "Calc.Add(Int32,Int32)"),
            ("Calc.Add(Int32,Int32)", "Calc.Multiply(Int32,Int32)"),
        ]);
        let index = SourceIndex::from_records(vec![test_record("Tests.AddT()")]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        let entries = coverage.tests_for(&id("Calc.Multiply(Int32,Int32)"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].depth, 2);
        assert!((entries[0].confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn unrelated_test_has_no_entry() {
        let graph = graph_with_edges(&[("Tests.AddT()", "Calc.Add(Int32,Int32)")]);
        let index = SourceIndex::from_records(vec![test_record("Tests.AddT()")]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        assert!(coverage.tests_for(&id("Unrelated.Method()")).is_empty());
    }

    #[test]
    fn shortest_path_is_kept_when_multiple_exist() {
        let graph = graph_with_edges(&[
            ("T()", "A()"),
            ("A()", "Target()"),
            ("T()", "B()"),
            ("B()", "C()"),
            ("C()", "Target()"),
        ]);
        let index = SourceIndex::from_records(vec![test_record("T()")]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        let entries = coverage.tests_for(&id("Target()"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].depth, 2);
    }

    #[test]
    fn framework_penalty_reduces_confidence() {
        let graph = graph_with_edges(&[("T()", "System.String.Format(String)")]);
        let index = SourceIndex::from_records(vec![test_record("T()")]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        let entries = coverage.tests_for(&id("System.String.Format(String)"));
        assert!((entries[0].confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn methods_for_is_symmetric_with_tests_for() {
        let graph = graph_with_edges(&[("T()", "P()")]);
        let index = SourceIndex::from_records(vec![test_record("T()")]);
        let coverage = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &CancellationToken::new()).unwrap();

        assert!(coverage.methods_for(&id("T()")).contains(&id("P()")));
        assert!(coverage.tests_for(&id("P()")).iter().any(|e| e.test == id("T()")));
    }

    #[test]
    fn build_returns_cancelled_without_mutating_state_when_tripped() {
        let graph = graph_with_edges(&[("T()", "P()")]);
        let index = SourceIndex::from_records(vec![test_record("T()")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = CoverageIndex::build(&index, &graph, CoverageOptions::default(), &cancel);
        assert!(matches!(result, Err(crate::error::EngineError::Cancelled)));
    }
}
