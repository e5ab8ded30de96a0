//! Document copier: streams one collection from the source into the local
//! collection.
//!
//! Batches are pulled from the remote cursor with the database lock
//! released. Each batch is then inserted with the lock held, one write unit
//! per document. Every `yield_interval` documents the lock is yielded so
//! other operations on the database can make progress; after each yield and
//! at each batch boundary the target is re-verified before continuing.

use crate::config::{ClonerConfig, DuplicateKeyPolicy};
use crate::context::OperationContext;
use crate::error::{CloneError, CloneResult};
use crate::fail_point::{self, FailPoint, FailPointSite};
use crate::lock::DatabaseLock;
use crate::namespace::Namespace;
use crate::progress::ProgressMeter;
use crate::remote::{BatchStream, QueryRequest, RemoteSource};
use crate::replication::ReplicationCoordinator;
use crate::retry::write_conflict_retry;
use crate::stats::NamespaceStats;
use crate::storage::StorageEngine;
use clonedb_codec::{Document, DocumentValidator, RawDocument};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Copies the documents of one namespace at a time.
pub struct DocumentCopier<'a> {
    config: &'a ClonerConfig,
    storage: &'a dyn StorageEngine,
    replication: &'a dyn ReplicationCoordinator,
    fail_point: &'a dyn FailPoint,
    ctx: &'a OperationContext,
    validator: DocumentValidator,
}

struct CopyState {
    processed: usize,
    progress: ProgressMeter,
}

impl<'a> DocumentCopier<'a> {
    /// Creates a document copier.
    pub fn new(
        config: &'a ClonerConfig,
        storage: &'a dyn StorageEngine,
        replication: &'a dyn ReplicationCoordinator,
        fail_point: &'a dyn FailPoint,
        ctx: &'a OperationContext,
    ) -> Self {
        Self {
            config,
            storage,
            replication,
            fail_point,
            ctx,
            validator: DocumentValidator::new(config.validation.clone()),
        }
    }

    /// Copies every document matching `request` from `source` into `nss`.
    ///
    /// The lock must be held on entry and is held again on return, whether
    /// or not the copy succeeded.
    pub fn copy(
        &self,
        source: &mut dyn RemoteSource,
        lock: &mut DatabaseLock<'_>,
        nss: &Namespace,
        request: &QueryRequest,
        stats: &mut NamespaceStats,
    ) -> CloneResult<()> {
        debug!(ns = %nss, source = %source.server_address(), "cloning collection");

        let mut state = CopyState {
            processed: 0,
            progress: ProgressMeter::new(nss.clone(), self.config.progress_interval),
        };

        lock.release();
        let streamed = self.stream(source, lock, nss, request, &mut state, stats);
        let reacquired = lock.reacquire();
        streamed?;
        reacquired?;

        self.check_role(nss, "after cloning collection")
    }

    fn stream(
        &self,
        source: &mut dyn RemoteSource,
        lock: &mut DatabaseLock<'_>,
        nss: &Namespace,
        request: &QueryRequest,
        state: &mut CopyState,
        stats: &mut NamespaceStats,
    ) -> CloneResult<()> {
        let cursor = source.query(nss, request)?;
        for batch in BatchStream::new(cursor) {
            let batch = batch?;

            lock.reacquire()?;
            self.verify_target(nss, "while cloning collection")?;
            for raw in batch {
                self.process(lock, nss, &raw, state, stats)?;
            }
            lock.release();
        }
        Ok(())
    }

    fn process(
        &self,
        lock: &mut DatabaseLock<'_>,
        nss: &Namespace,
        raw: &RawDocument,
        state: &mut CopyState,
        stats: &mut NamespaceStats,
    ) -> CloneResult<()> {
        let interval = self.config.yield_interval;
        if interval > 0 && state.processed > 0 && state.processed % interval == 0 {
            self.ctx.check_for_interrupt()?;
            lock.yield_lock()?;
            stats.yields += 1;
            self.verify_target(nss, "after yielding")?;
        }
        state.processed += 1;
        stats.documents_seen += 1;
        state.progress.hit();

        self.ctx.check_for_interrupt()?;

        let doc = match self.validator.validate(raw) {
            Ok(doc) => doc,
            Err(e) if self.config.skip_corrupt_documents => {
                warn!(ns = %nss, error = %e, "found corrupt document; skipping");
                stats.corrupt_skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(CloneError::corrupt_data(nss, e)),
        };

        fail_point::check(self.fail_point, FailPointSite::CopyBeforeInsert)?;

        match write_conflict_retry(self.ctx, "cloner insert", nss, || self.insert(nss, &doc))? {
            InsertOutcome::Inserted => stats.documents_inserted += 1,
            InsertOutcome::Duplicate => stats.duplicates_ignored += 1,
        }
        Ok(())
    }

    fn insert(&self, nss: &Namespace, doc: &Document) -> CloneResult<InsertOutcome> {
        self.ctx.check_for_interrupt()?;

        let mut unit = self.storage.begin_unit();
        match unit.insert_document(nss, doc) {
            Ok(()) => {
                unit.commit()?;
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if e.is_write_conflict() => Err(e.into()),
            Err(e)
                if e.is_duplicate_key()
                    && self.config.duplicate_key_policy == DuplicateKeyPolicy::Tolerate =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => {
                error!(ns = %nss, error = %e, "error cloning document");
                Err(e.into())
            }
        }
    }

    fn check_role(&self, nss: &Namespace, context: &'static str) -> CloneResult<()> {
        if self.replication.writes_are_replicated() && !self.replication.can_accept_writes_for(nss)
        {
            return Err(CloneError::role_changed(nss, context));
        }
        Ok(())
    }

    fn verify_target(&self, nss: &Namespace, context: &'static str) -> CloneResult<()> {
        self.check_role(nss, context)?;
        if !self.storage.database_exists(nss.db()) {
            return Err(CloneError::DatabaseDropped {
                db: nss.db().to_string(),
            });
        }
        if self.storage.lookup_collection(nss).is_none() {
            return Err(CloneError::CollectionDropped { nss: nss.clone() });
        }
        Ok(())
    }
}
