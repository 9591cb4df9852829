//! Configuration schema for the test impact engine.
//!
//! This module defines everything that can be deserialized from a TOML
//! configuration file: the solution descriptor that tells `SourceIndex`
//! what to parse, and the table of recognized tunable options.
//!
//! # Schema overview
//!
//! ```text
//! EngineConfig (root)
//! ├── solution: SolutionDescriptor   - projects, source files, references
//! └── options: EngineOptions         - depth/decay/penalty/history/parallelism/filters
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Describes the projects `SourceIndex` should parse.
    pub solution: SolutionDescriptor,

    /// Tunable knobs for coverage, scoring, and selection. Every field has
    /// a sensible default, so the section itself is optional.
    #[serde(default)]
    pub options: EngineOptions,
}

/// A solution: the set of projects making up the repository under analysis.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SolutionDescriptor {
    pub projects: Vec<ProjectDescriptor>,
}

/// A single project manifest within the solution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectDescriptor {
    /// Path to the project manifest (informational; not parsed itself).
    pub path: PathBuf,

    /// Target-framework tag (e.g. `net8.0`), carried through to
    /// `MethodRecord::framework_version_tag`.
    #[serde(default)]
    pub framework_tag: Option<String>,

    /// Source files belonging to this project, parsed in the given order.
    pub source_files: Vec<PathBuf>,

    /// Other projects this one references (used only for diagnostics today;
    /// cross-project symbol resolution is lexical/heuristic, not
    /// assembly-accurate).
    #[serde(default)]
    pub references: Vec<PathBuf>,
}

/// Tunable engine options. Spec §6's "Configuration options (recognized)".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineOptions {
    /// Maximum BFS depth in `CoverageIndex` traversal (spec §4.3).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Per-hop confidence decay `α` (spec §4.3).
    #[serde(default = "default_decay_per_hop")]
    pub decay_per_hop: f64,

    /// Confidence penalty applied to framework-namespace methods (spec §4.3).
    #[serde(default = "default_framework_penalty")]
    pub framework_penalty: f64,

    /// Number of historical executions considered by the historical scorer
    /// and `HistoryLog` rolling queries (spec §4.5, §4.7).
    #[serde(default = "default_history_window")]
    pub history_window: u32,

    /// Worker count for `rayon`-backed parallel phases. Defaults to the
    /// host's available parallelism (spec §5: "default = CPU count").
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: u32,

    /// Whether flaky tests may still be selected (spec §4.6 admission rule
    /// `!is_flaky || include_flaky`).
    #[serde(default)]
    pub include_flaky: bool,

    /// If non-empty, only these categories are eligible for selection.
    #[serde(default)]
    pub included_categories: HashSet<String>,

    /// Categories excluded from selection regardless of score.
    #[serde(default)]
    pub excluded_categories: HashSet<String>,

    /// Tags a test must carry to be eligible.
    #[serde(default)]
    pub required_tags: HashSet<String>,

    /// Tags that exclude a test from selection.
    #[serde(default)]
    pub excluded_tags: HashSet<String>,

    /// Overrides the confidence level's default test-count cap.
    #[serde(default)]
    pub max_tests: Option<usize>,

    /// Overrides the confidence level's default duration budget, in seconds.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// Overrides the confidence level's default minimum composite score.
    #[serde(default)]
    pub min_score: Option<f64>,

    /// Overrides `Fast`'s default 80/20 unit/integration slot split, as
    /// `(category name, fraction)` pairs (spec §9's Open Question: the
    /// split "may be configurable").
    #[serde(default)]
    pub category_mix: Option<Vec<(String, f64)>>,
}

fn default_max_depth() -> u32 {
    5
}

fn default_decay_per_hop() -> f64 {
    0.15
}

fn default_framework_penalty() -> f64 {
    0.1
}

fn default_history_window() -> u32 {
    30
}

fn default_max_parallelism() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            decay_per_hop: default_decay_per_hop(),
            framework_penalty: default_framework_penalty(),
            history_window: default_history_window(),
            max_parallelism: default_max_parallelism(),
            include_flaky: false,
            included_categories: HashSet::new(),
            excluded_categories: HashSet::new(),
            required_tags: HashSet::new(),
            excluded_tags: HashSet::new(),
            max_tests: None,
            max_duration_secs: None,
            min_score: None,
            category_mix: None,
        }
    }
}
