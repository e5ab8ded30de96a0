//! Replication role double.

use clonedb_core::{Namespace, ReplicationCoordinator};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Role {
    replicated: AtomicBool,
    writable: AtomicBool,
    checks: AtomicU64,
}

/// A replication coordinator whose role tests can flip at any time.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplication {
    role: Arc<Role>,
}

impl MemoryReplication {
    /// A standalone node: writes are not replicated.
    #[must_use]
    pub fn standalone() -> Self {
        let replication = Self::default();
        replication.role.writable.store(true, Ordering::SeqCst);
        replication
    }

    /// A replicated primary.
    #[must_use]
    pub fn primary() -> Self {
        let replication = Self::standalone();
        replication.role.replicated.store(true, Ordering::SeqCst);
        replication
    }

    /// Stops accepting writes.
    pub fn step_down(&self) {
        self.role.writable.store(false, Ordering::SeqCst);
    }

    /// Starts accepting writes again.
    pub fn step_up(&self) {
        self.role.writable.store(true, Ordering::SeqCst);
    }

    /// Number of role checks made by the engine.
    #[must_use]
    pub fn checks(&self) -> u64 {
        self.role.checks.load(Ordering::SeqCst)
    }

    fn writable(&self) -> bool {
        self.role.checks.fetch_add(1, Ordering::SeqCst);
        self.role.writable.load(Ordering::SeqCst)
    }
}

impl ReplicationCoordinator for MemoryReplication {
    fn writes_are_replicated(&self) -> bool {
        self.role.replicated.load(Ordering::SeqCst)
    }

    fn can_accept_writes_for(&self, _nss: &Namespace) -> bool {
        self.writable()
    }

    fn can_accept_writes_for_database(&self, _db: &str) -> bool {
        self.writable()
    }
}
