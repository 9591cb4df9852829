//! Cooperative cancellation checked at phase suspension points.
//!
//! Every long operation accepts a cancellation signal checked at each
//! suspension point; on cancellation, operations return a `Cancelled` error
//! without mutating shared state. Suspension points are parse-file
//! boundaries, inter-project boundaries in `SourceIndex`, and BFS-batch
//! boundaries in `CoverageIndex`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// A cheaply cloned handle that can be flipped to request cancellation.
///
/// An `AtomicBool`-backed flag rather than a channel or async cancellation
/// primitive, since every phase here checks cooperatively between
/// synchronous steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(EngineError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_propagates_through_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(EngineError::Cancelled)));
    }
}
