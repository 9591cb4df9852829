//! # testimpact
//!
//! Static call-graph test impact analysis: given a code change, which test
//! methods are most worth running, and with what confidence.
//!
//! ## Overview
//!
//! `testimpact` builds a language-heuristic, inter-procedural call graph
//! over a C#-attributed test solution (NUnit/xUnit/MSTest), computes
//! reverse reachability from every test method to the production code it
//! exercises, and uses that coverage map — combined with historical
//! pass/fail data and execution-time signals — to select a bounded,
//! batched execution plan for a given set of source changes.
//!
//! It does not execute tests, instrument coverage at runtime, or guarantee
//! call-graph completeness under dynamic dispatch beyond the heuristics
//! documented on [`source`].
//!
//! ## Architecture
//!
//! ### Source analysis ([`source`], [`method_id`])
//!
//! [`source::SourceIndex`] parses a solution into [`source::MethodRecord`]s
//! keyed by stable [`method_id::MethodId`]s and assembles the
//! [`source::CallGraph`] ([`source::callgraph::CallGraph`]) from resolved
//! invocation sites.
//!
//! ### Test classification ([`test_registry`])
//!
//! [`test_registry::TestRegistry`] marks methods as tests, fixtures,
//! setup/teardown by attribute name, and assigns each test a
//! [`test_registry::TestCategory`].
//!
//! ### Coverage ([`coverage`])
//!
//! [`coverage::CoverageIndex`] performs bounded, confidence-decayed reverse
//! reachability from every test to the production methods it can reach.
//!
//! ### Change impact ([`change_resolver`])
//!
//! [`change_resolver::resolve`] maps a diff ([`change_resolver::DiffInput`])
//! to an affected [`change_resolver::ChangeSet`] of `MethodId`s.
//!
//! ### Scoring and selection ([`scorer`], [`selector`])
//!
//! [`scorer::CompositeScorer`] combines impact, historical, and
//! execution-time signals into a single score per test;
//! [`selector::select`] turns scored tests into a bounded, batched
//! [`selector::ExecutionPlan`] under a [`selector::ConfidenceLevel`] policy.
//!
//! ### History ([`history`])
//!
//! [`history::HistoryLog`] is a thread-safe, append-only record of prior
//! executions backing the historical scorer and flakiness detection.
//!
//! ### Engine ([`engine`])
//!
//! [`engine::Engine`] is the stable entry point tying every subsystem
//! together behind the five Engine API calls: `build_index`,
//! `get_tests_for_method`, `resolve_changes`, `plan`, `record_results`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use testimpact::cancel::CancellationToken;
//! use testimpact::config::load_config;
//! use testimpact::engine::Engine;
//! use testimpact::selector::ConfidenceLevel;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testimpact.toml"))?;
//!     let engine = Engine::new();
//!     let cancel = CancellationToken::new();
//!
//!     let built = engine.build_index(&config.solution, config.options.clone(), &cancel)?;
//!     for warning in &built.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!
//!     let (plan, _warnings) = engine.plan(None, ConfidenceLevel::Fast, Some(&config.options));
//!     println!("{}", plan.rationale);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod change_resolver;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod history;
pub mod method_id;
pub mod scorer;
pub mod selector;
pub mod source;
pub mod test_registry;

// Re-export the types most callers need when driving the engine end to end.
pub use change_resolver::{ChangeSet, DiffInput};
pub use config::{load_config, EngineConfig, EngineOptions};
pub use coverage::CoverageEntry;
pub use engine::{Engine, IndexHandle};
pub use error::{EngineError, EngineResult, Warning};
pub use method_id::MethodId;
pub use selector::{ConfidenceLevel, ExecutionPlan};
