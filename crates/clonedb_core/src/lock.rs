//! Exclusive database lock guard.

use crate::error::CloneResult;
use crate::storage::{LockTicket, StorageEngine};
use tracing::trace;

/// The exclusive lock on one database, held across local mutations and
/// released around remote calls.
///
/// The lock is released when the guard is dropped, so every exit path
/// (success, error, cancellation) gives it back. While released it is
/// re-acquired only by an explicit [`DatabaseLock::reacquire`].
pub struct DatabaseLock<'a> {
    storage: &'a dyn StorageEngine,
    db: String,
    ticket: Option<LockTicket>,
}

impl<'a> DatabaseLock<'a> {
    /// Acquires the exclusive lock on `db`.
    pub fn acquire(storage: &'a dyn StorageEngine, db: &str) -> CloneResult<Self> {
        let ticket = storage.acquire_exclusive(db)?;
        trace!(db, "exclusive lock acquired");
        Ok(Self {
            storage,
            db: db.to_string(),
            ticket: Some(ticket),
        })
    }

    /// Returns the locked database name.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Returns true while the lock is held.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.ticket.is_some()
    }

    /// Releases the lock. Does nothing if it is not held.
    pub fn release(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.storage.release_exclusive(ticket);
            trace!(db = %self.db, "exclusive lock released");
        }
    }

    /// Re-acquires the lock. Does nothing if it is already held.
    pub fn reacquire(&mut self) -> CloneResult<()> {
        if self.ticket.is_none() {
            self.ticket = Some(self.storage.acquire_exclusive(&self.db)?);
            trace!(db = %self.db, "exclusive lock re-acquired");
        }
        Ok(())
    }

    /// Releases the lock, lets other waiters run, then re-acquires it.
    pub fn yield_lock(&mut self) -> CloneResult<()> {
        self.release();
        std::thread::yield_now();
        self.reacquire()
    }

    /// Runs `f` with the lock released and re-acquires it afterwards,
    /// whether or not `f` succeeded.
    ///
    /// If both `f` and the re-acquisition fail, the error from `f` wins.
    pub fn with_released<T>(&mut self, f: impl FnOnce() -> CloneResult<T>) -> CloneResult<T> {
        self.release();
        let result = f();
        let reacquired = self.reacquire();
        let value = result?;
        reacquired?;
        Ok(value)
    }
}

impl Drop for DatabaseLock<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DatabaseLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseLock")
            .field("db", &self.db)
            .field("held", &self.is_held())
            .finish()
    }
}
