//! Error kinds and warning accumulation shared across the engine.
//!
//! Errors are *kinds*, not an exception hierarchy: leaf phases accumulate
//! non-fatal problems into a warning list and only short-circuit on a
//! fatal `EngineError`. No phase here has fatal conditions distinct from
//! the four kinds below, so a single cross-cutting enum covers all of them.

use std::path::PathBuf;

/// Top-level engine error, returned from fatal phase boundaries.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Caller-supplied input was structurally invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled via a [`crate::cancel::CancellationToken`]
    /// before completion; no shared state was mutated.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant was violated. Always fatal.
    #[error("internal error: {0}")]
    Internal(String),

    /// Propagated I/O failure reading solution files, history logs, etc.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A non-fatal problem surfaced alongside a successful phase result.
///
/// A caller sees a plan, a list of warnings, and at most one fatal error.
/// Every phase that can partially fail (a project that doesn't parse, a
/// call site that doesn't resolve, a scorer that throws) appends here
/// instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Warning {
    /// A project failed to parse and was skipped entirely.
    ParseFailure { project: String, details: String },
    /// A call site's target could not be resolved to a `MethodId`; the
    /// edge was dropped rather than guessed at.
    UnresolvedReference { method: String, site: PathBuf },
    /// A scorer raised while scoring a test; its contribution was treated
    /// as zero for that test.
    ScorerFailed { scorer: &'static str, test: String, reason: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::ParseFailure { project, details } => {
                write!(f, "project '{project}' failed to parse: {details}")
            }
            Warning::UnresolvedReference { method, site } => {
                write!(f, "unresolved reference from {method} at {}", site.display())
            }
            Warning::ScorerFailed { scorer, test, reason } => {
                write!(f, "scorer '{scorer}' failed for test '{test}': {reason}")
            }
        }
    }
}

/// A result bundled with any warnings collected while producing it.
///
/// Used at phase boundaries where a value is still produced even though
/// some inputs were only partially usable.
#[derive(Debug, Clone)]
pub struct WithWarnings<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> WithWarnings<T> {
    pub fn new(value: T) -> Self {
        Self { value, warnings: Vec::new() }
    }

    pub fn with_warnings(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }
}
