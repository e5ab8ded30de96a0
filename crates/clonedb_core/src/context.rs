//! Per-operation context: cooperative cancellation and retry accounting.

use crate::error::{CloneError, CloneResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A cloneable handle that requests cancellation of a running clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Creates a handle in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// State shared by every step of one clone invocation.
///
/// Cancellation is cooperative: the engine polls
/// [`OperationContext::check_for_interrupt`] at transaction boundaries and
/// yield points, never in the middle of a write unit.
#[derive(Debug, Default)]
pub struct OperationContext {
    cancellation: CancellationHandle,
    write_conflict_retries: AtomicU64,
}

impl OperationContext {
    /// Creates a context observing `cancellation`.
    #[must_use]
    pub fn new(cancellation: CancellationHandle) -> Self {
        Self {
            cancellation,
            write_conflict_retries: AtomicU64::new(0),
        }
    }

    /// Returns the cancellation handle.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    /// Fails with [`CloneError::Cancelled`] if cancellation was requested.
    pub fn check_for_interrupt(&self) -> CloneResult<()> {
        if self.cancellation.is_cancelled() {
            Err(CloneError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Records one retried write conflict.
    pub fn record_write_conflict(&self) -> u64 {
        self.write_conflict_retries.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of write conflicts retried so far.
    #[must_use]
    pub fn write_conflict_retries(&self) -> u64 {
        self.write_conflict_retries.load(Ordering::Relaxed)
    }
}
