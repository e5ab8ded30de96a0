//! Operation log double.

use clonedb_core::{
    BuildId, CollectionUuid, IndexSpec, Namespace, OpObserver, StorageError, StorageResult,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An operation log entry written by the index builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OplogEntry {
    /// Start of a two-phase index build.
    StartIndexBuild {
        /// Namespace being indexed.
        nss: Namespace,
        /// Collection identity.
        uuid: CollectionUuid,
        /// Build identifier.
        build_id: BuildId,
        /// Names of the indexes being built.
        indexes: Vec<String>,
    },
    /// Commit of a two-phase index build.
    CommitIndexBuild {
        /// Namespace being indexed.
        nss: Namespace,
        /// Collection identity.
        uuid: CollectionUuid,
        /// Build identifier.
        build_id: BuildId,
        /// Names of the indexes built.
        indexes: Vec<String>,
    },
    /// Single-phase creation of one index.
    CreateIndex {
        /// Namespace being indexed.
        nss: Namespace,
        /// Collection identity.
        uuid: CollectionUuid,
        /// Index name.
        index: String,
    },
}

fn names(specs: &[IndexSpec]) -> Vec<String> {
    specs.iter().map(|spec| spec.name.clone()).collect()
}

/// Records every entry in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    entries: Arc<Mutex<Vec<OplogEntry>>>,
    fail_start: Arc<AtomicBool>,
}

impl RecordingObserver {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every "start index build" write fail.
    pub fn fail_start_index_build(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Entries written so far.
    #[must_use]
    pub fn entries(&self) -> Vec<OplogEntry> {
        self.entries.lock().clone()
    }
}

impl OpObserver for RecordingObserver {
    fn on_start_index_build(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        build_id: BuildId,
        specs: &[IndexSpec],
    ) -> StorageResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(StorageError::Internal("oplog unavailable".into()));
        }
        self.entries.lock().push(OplogEntry::StartIndexBuild {
            nss: nss.clone(),
            uuid: collection_uuid,
            build_id,
            indexes: names(specs),
        });
        Ok(())
    }

    fn on_commit_index_build(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        build_id: BuildId,
        specs: &[IndexSpec],
    ) -> StorageResult<()> {
        self.entries.lock().push(OplogEntry::CommitIndexBuild {
            nss: nss.clone(),
            uuid: collection_uuid,
            build_id,
            indexes: names(specs),
        });
        Ok(())
    }

    fn on_create_index(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        spec: &IndexSpec,
    ) -> StorageResult<()> {
        self.entries.lock().push(OplogEntry::CreateIndex {
            nss: nss.clone(),
            uuid: collection_uuid,
            index: spec.name.clone(),
        });
        Ok(())
    }
}
