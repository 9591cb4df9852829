//! Composable scoring algorithms over a test + change set.
//!
//! Each scorer is a small struct implementing [`Scorer`], composed by
//! [`CompositeScorer`] into a weighted mean. A scorer that panics has its
//! contribution treated as `0.0`, caught with `std::panic::catch_unwind` at
//! the composite boundary and logged via `tracing::warn!`, the same way the
//! engine treats a single bad input as a warning rather than a whole-run
//! failure elsewhere (`ParseFailure`, `UnresolvedReference`).

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::coverage::CoverageIndex;
use crate::error::Warning;
use crate::method_id::MethodId;
use crate::test_registry::TestRecord;

/// Everything a scorer needs beyond the test itself: the affected method
/// set from a `ChangeSet`, a handle to `CoverageIndex`, and tunables shared
/// across scorers.
pub struct ScoringContext<'a> {
    pub affected_methods: &'a HashSet<MethodId>,
    pub coverage: &'a CoverageIndex,
    /// Window for the historical scorer's rolling pass rate (`N=30` by
    /// default).
    pub history_window: usize,
    /// The slowest `avg_execution` among candidate tests, in milliseconds;
    /// the execution-time scorer's `max_ms` normalizer.
    pub max_duration_ms: f64,
}

/// `(test, context) -> [0,1]` with a positive weight. A scorer must be
/// pure and deterministic given `(test, context)`.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> f64;
    fn score(&self, test: &TestRecord, ctx: &ScoringContext) -> f64;
}

/// `score = max over affected methods m of coverage_confidence(test, m)`;
/// `0` if the test covers none of them. Weight `1.0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImpactScorer;

impl Scorer for ImpactScorer {
    fn name(&self) -> &'static str {
        "impact"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn score(&self, test: &TestRecord, ctx: &ScoringContext) -> f64 {
        ctx.affected_methods
            .iter()
            .map(|m| ctx.coverage.confidence(test.id(), m))
            .fold(0.0, f64::max)
    }
}

/// `score = 0.7*pass_rate + 0.3*(1 - flakiness)` over the last `N`
/// executions; unknown history is neutral (`0.5`). Weight `0.6`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoricalScorer;

impl Scorer for HistoricalScorer {
    fn name(&self) -> &'static str {
        "historical"
    }

    fn weight(&self) -> f64 {
        0.6
    }

    fn score(&self, test: &TestRecord, ctx: &ScoringContext) -> f64 {
        let Some(pass_rate) = test.history.pass_rate(test.id(), ctx.history_window) else {
            return 0.5;
        };
        let flakiness = if test.history.is_flaky(test.id(), ctx.history_window) { 1.0 } else { 0.0 };
        0.7 * pass_rate + 0.3 * (1.0 - flakiness)
    }
}

/// Favours faster tests as a tiebreaker:
/// `score = 1 - clamp(log10(ms+1)/log10(max_ms+1), 0, 1)`. Weight `0.3`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionTimeScorer;

impl Scorer for ExecutionTimeScorer {
    fn name(&self) -> &'static str {
        "execution_time"
    }

    fn weight(&self) -> f64 {
        0.3
    }

    fn score(&self, test: &TestRecord, ctx: &ScoringContext) -> f64 {
        let ms = test.avg_execution.as_millis() as f64;
        let max_ms = ctx.max_duration_ms.max(1.0);
        let denom = (max_ms + 1.0).log10();
        if denom <= 0.0 {
            return 1.0;
        }
        let normalized = ((ms + 1.0).log10() / denom).clamp(0.0, 1.0);
        1.0 - normalized
    }
}

/// Computes the weighted mean of every registered scorer's output for a
/// test, isolating a panicking scorer's failure to a `0.0` contribution
/// plus a warning rather than aborting the run.
pub struct CompositeScorer {
    scorers: Vec<Box<dyn Scorer>>,
}

impl Default for CompositeScorer {
    /// The three mandatory scorers, in their documented order.
    fn default() -> Self {
        Self {
            scorers: vec![Box::new(ImpactScorer), Box::new(HistoricalScorer), Box::new(ExecutionTimeScorer)],
        }
    }
}

impl CompositeScorer {
    pub fn new(scorers: Vec<Box<dyn Scorer>>) -> Self {
        Self { scorers }
    }

    /// The composite score for `test`, plus any `ScorerFailed` warnings
    /// collected along the way.
    pub fn score(&self, test: &TestRecord, ctx: &ScoringContext) -> (f64, Vec<Warning>) {
        let mut warnings = Vec::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for scorer in &self.scorers {
            let weight = scorer.weight();
            let outcome = catch_unwind(AssertUnwindSafe(|| scorer.score(test, ctx)));
            let contribution = match outcome {
                Ok(value) if value.is_finite() => value.clamp(0.0, 1.0),
                Ok(_) => {
                    warnings.push(Warning::ScorerFailed {
                        scorer: scorer.name(),
                        test: test.id().to_string(),
                        reason: "non-finite score".to_string(),
                    });
                    0.0
                }
                Err(_) => {
                    warnings.push(Warning::ScorerFailed {
                        scorer: scorer.name(),
                        test: test.id().to_string(),
                        reason: "scorer panicked".to_string(),
                    });
                    0.0
                }
            };
            weighted_sum += contribution * weight;
            weight_total += weight;
        }

        let composite = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
        (composite, warnings)
    }
}
