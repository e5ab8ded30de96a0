//! Write-conflict retry loop.

use crate::context::OperationContext;
use crate::error::CloneResult;
use crate::namespace::Namespace;
use tracing::trace;

/// Runs `attempt` until it does not fail with a write conflict.
///
/// There is no attempt cap. Conflicts are transient under optimistic
/// concurrency, so the loop is bounded only by cancellation, which is
/// checked before every attempt. Any error other than a write conflict is
/// returned as is.
pub fn write_conflict_retry<T>(
    ctx: &OperationContext,
    op_name: &str,
    nss: &Namespace,
    mut attempt: impl FnMut() -> CloneResult<T>,
) -> CloneResult<T> {
    loop {
        ctx.check_for_interrupt()?;
        match attempt() {
            Err(e) if e.is_write_conflict() => {
                let retries = ctx.record_write_conflict();
                trace!(op = op_name, ns = %nss, retries, "write conflict, retrying");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationHandle;
    use crate::error::CloneError;
    use crate::storage::StorageError;

    fn nss() -> Namespace {
        Namespace::new("shop", "orders")
    }

    #[test]
    fn retries_until_success() {
        let ctx = OperationContext::default();
        let mut remaining = 5;
        let value = write_conflict_retry(&ctx, "insert", &nss(), || {
            if remaining > 0 {
                remaining -= 1;
                Err(StorageError::write_conflict("insert").into())
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(ctx.write_conflict_retries(), 5);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let ctx = OperationContext::default();
        let mut calls = 0;
        let result: CloneResult<()> = write_conflict_retry(&ctx, "insert", &nss(), || {
            calls += 1;
            Err(StorageError::Internal("disk full".into()).into())
        });
        assert!(matches!(result, Err(CloneError::Storage(StorageError::Internal(_)))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let handle = CancellationHandle::new();
        let ctx = OperationContext::new(handle.clone());
        let mut calls = 0;
        let result: CloneResult<()> = write_conflict_retry(&ctx, "insert", &nss(), || {
            calls += 1;
            if calls == 3 {
                handle.cancel();
            }
            Err(StorageError::write_conflict("insert").into())
        });
        assert!(matches!(result, Err(CloneError::Cancelled)));
        assert_eq!(calls, 3);
    }
}
