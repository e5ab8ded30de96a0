//! Clone statistics.
//!
//! A [`CloneStats`] is returned by every successful
//! [`Cloner::copy_database`](crate::Cloner::copy_database) call.

use crate::namespace::Namespace;
use std::collections::{BTreeMap, BTreeSet};

/// Namespaces that were populated with documents by a clone.
pub type ClonedNamespaces = BTreeSet<Namespace>;

/// Counters for one copied namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    /// Documents received from the remote cursor.
    pub documents_seen: u64,
    /// Documents inserted locally.
    pub documents_inserted: u64,
    /// Documents already present locally.
    pub duplicates_ignored: u64,
    /// Corrupt documents skipped.
    pub corrupt_skipped: u64,
    /// Times the exclusive lock was yielded.
    pub yields: u64,
    /// Secondary indexes built.
    pub indexes_built: u64,
}

/// Counters for a whole clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneStats {
    /// Collections created by this clone.
    pub collections_created: u64,
    /// Sharded collections that already existed with a matching identity.
    pub collections_already_present: u64,
    /// Write conflicts that were retried.
    pub write_conflict_retries: u64,
    /// Per-namespace counters.
    pub namespaces: BTreeMap<Namespace, NamespaceStats>,
}

impl CloneStats {
    /// Returns the counters for `nss`, creating them if absent.
    pub fn namespace_mut(&mut self, nss: &Namespace) -> &mut NamespaceStats {
        self.namespaces.entry(nss.clone()).or_default()
    }

    /// Counters for `nss`, if it was touched.
    #[must_use]
    pub fn namespace(&self, nss: &Namespace) -> Option<&NamespaceStats> {
        self.namespaces.get(nss)
    }

    /// Total documents inserted across namespaces.
    #[must_use]
    pub fn documents_inserted(&self) -> u64 {
        self.namespaces.values().map(|s| s.documents_inserted).sum()
    }

    /// Total duplicates ignored across namespaces.
    #[must_use]
    pub fn duplicates_ignored(&self) -> u64 {
        self.namespaces.values().map(|s| s.duplicates_ignored).sum()
    }

    /// Total corrupt documents skipped across namespaces.
    #[must_use]
    pub fn corrupt_skipped(&self) -> u64 {
        self.namespaces.values().map(|s| s.corrupt_skipped).sum()
    }

    /// Total secondary indexes built across namespaces.
    #[must_use]
    pub fn indexes_built(&self) -> u64 {
        self.namespaces.values().map(|s| s.indexes_built).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_namespaces() {
        let mut stats = CloneStats::default();
        stats.namespace_mut(&Namespace::new("a", "x")).documents_inserted = 3;
        stats.namespace_mut(&Namespace::new("a", "y")).documents_inserted = 4;
        stats.namespace_mut(&Namespace::new("a", "y")).indexes_built = 1;
        assert_eq!(stats.documents_inserted(), 7);
        assert_eq!(stats.indexes_built(), 1);
        assert!(stats.namespace(&Namespace::new("a", "z")).is_none());
    }
}
