//! Test fixtures: documents, fail points and a ready-made cluster.

use crate::observer::RecordingObserver;
use crate::remote::MemoryRemote;
use crate::replication::MemoryReplication;
use crate::storage::MemoryStorage;
use bytes::Bytes;
use clonedb_codec::{Document, RawDocument, Value, ID_FIELD};
use clonedb_core::{Cloner, ClonerConfig, Endpoint, FailPoint, FailPointSite};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Address the fixture remote answers on.
pub const REMOTE_HOST: &str = "donor.example";

/// Port the fixture remote answers on.
pub const REMOTE_PORT: u16 = 27017;

/// Builds an integer value.
#[must_use]
pub fn int(i: i64) -> Value {
    Value::Integer(i.into())
}

/// Builds a serialized document from fields.
///
/// # Panics
///
/// Panics if the fields cannot be encoded.
#[must_use]
pub fn raw_doc(fields: Vec<(&str, Value)>) -> RawDocument {
    let fields = fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    Document::from_fields(fields)
        .expect("fixture document must encode")
        .raw()
        .clone()
}

/// Builds a serialized document with an integer `_id` and extra fields.
#[must_use]
pub fn doc_with_id(id: i64, extra: &[(&str, Value)]) -> RawDocument {
    let mut fields = vec![(ID_FIELD, int(id))];
    fields.extend(extra.iter().cloned());
    raw_doc(fields)
}

/// Builds `count` documents `{_id: i, x: i}` for `i` in `0..count`.
#[must_use]
pub fn numbered_docs(count: usize) -> Vec<RawDocument> {
    (0..count as i64)
        .map(|i| doc_with_id(i, &[("x", int(i))]))
        .collect()
}

/// Bytes that fail structural validation: a map header with no entries
/// following it.
#[must_use]
pub fn corrupt_doc() -> RawDocument {
    Bytes::from_static(&[0xa2, 0x63, b'_', b'i'])
}

/// A fail point that fires at chosen sites, counting every check.
#[derive(Debug, Default)]
pub struct ScriptedFailPoint {
    /// Site → number of checks to let pass before firing.
    armed: Mutex<HashMap<FailPointSite, u64>>,
    checks: Mutex<HashMap<FailPointSite, u64>>,
}

impl ScriptedFailPoint {
    /// Creates a fail point with no armed sites.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires at `site` on every check.
    #[must_use]
    pub fn always(self, site: FailPointSite) -> Self {
        self.after(site, 0)
    }

    /// Fires at `site` once `passes` checks have gone through.
    #[must_use]
    pub fn after(self, site: FailPointSite, passes: u64) -> Self {
        self.armed.lock().insert(site, passes);
        self
    }

    /// Number of times `site` was checked.
    #[must_use]
    pub fn checks(&self, site: FailPointSite) -> u64 {
        self.checks.lock().get(&site).copied().unwrap_or(0)
    }
}

impl FailPoint for ScriptedFailPoint {
    fn should_fail(&self, site: FailPointSite) -> bool {
        let mut checks = self.checks.lock();
        let seen = checks.entry(site).or_insert(0);
        let fire = self
            .armed
            .lock()
            .get(&site)
            .is_some_and(|passes| *seen >= *passes);
        *seen += 1;
        fire
    }
}

/// A local node and a remote source wired together.
#[derive(Debug, Clone)]
pub struct TestCluster {
    /// Local storage engine.
    pub storage: MemoryStorage,
    /// Remote source.
    pub remote: MemoryRemote,
    /// Replication role of the local node.
    pub replication: MemoryReplication,
    /// Operation log of the local node.
    pub observer: RecordingObserver,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCluster {
    /// Creates a cluster whose local node is a standalone.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: MemoryStorage::new(),
            remote: MemoryRemote::new(format!("{REMOTE_HOST}:{REMOTE_PORT}")),
            replication: MemoryReplication::standalone(),
            observer: RecordingObserver::new(),
        }
    }

    /// Creates a cluster whose local node is a replicated primary.
    #[must_use]
    pub fn replicated() -> Self {
        Self {
            replication: MemoryReplication::primary(),
            ..Self::new()
        }
    }

    /// Endpoint of the remote source.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::single(REMOTE_HOST, REMOTE_PORT)
    }

    /// Builds a cloner over this cluster.
    #[must_use]
    pub fn cloner(&self, config: ClonerConfig) -> Cloner {
        Cloner::new(
            config,
            Arc::new(self.remote.clone()),
            Arc::new(self.storage.clone()),
            Arc::new(self.replication.clone()),
            Arc::new(self.observer.clone()),
        )
    }
}
