//! Collection creator: materializes planned collections under the lock.

use crate::context::OperationContext;
use crate::error::{CloneError, CloneResult};
use crate::fail_point::{self, FailPoint, FailPointSite};
use crate::lock::DatabaseLock;
use crate::planner::CreationPlanEntry;
use crate::retry::write_conflict_retry;
use crate::stats::CloneStats;
use crate::storage::StorageEngine;
use tracing::{debug, info};

/// Result of reconciling one plan entry with the local catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The collection was created.
    Created,
    /// A sharded collection with the same identity already existed.
    AlreadyPresent,
}

/// Creates every planned collection that does not exist yet.
///
/// Entries are processed in order and the first failure stops the whole
/// operation; collections created before it are left in place.
pub struct CollectionCreator<'a> {
    storage: &'a dyn StorageEngine,
    ctx: &'a OperationContext,
    fail_point: &'a dyn FailPoint,
}

impl<'a> CollectionCreator<'a> {
    /// Creates a collection creator.
    pub fn new(
        storage: &'a dyn StorageEngine,
        ctx: &'a OperationContext,
        fail_point: &'a dyn FailPoint,
    ) -> Self {
        Self {
            storage,
            ctx,
            fail_point,
        }
    }

    /// Creates the collections of `entries` in database `lock.db()`.
    pub fn create_all(
        &self,
        lock: &DatabaseLock<'_>,
        entries: &[CreationPlanEntry],
        stats: &mut CloneStats,
    ) -> CloneResult<()> {
        debug_assert!(lock.is_held());
        self.storage.open_database(lock.db())?;

        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                fail_point::check(self.fail_point, FailPointSite::CreateCollectionsAfterFirst)?;
            }

            entry
                .nss
                .check_user_create()
                .map_err(|message| CloneError::InvalidNamespace { message })?;

            let outcome =
                write_conflict_retry(self.ctx, "createCollection", &entry.nss, || {
                    self.create_one(entry)
                })?;

            match outcome {
                CreateOutcome::Created => {
                    stats.collections_created += 1;
                    info!(ns = %entry.nss, sharded = entry.sharded, "created collection");
                }
                CreateOutcome::AlreadyPresent => {
                    stats.collections_already_present += 1;
                    debug!(ns = %entry.nss, "sharded collection already present");
                }
            }
        }
        Ok(())
    }

    /// Creates a single collection inside its own write unit.
    pub fn create_one(&self, entry: &CreationPlanEntry) -> CloneResult<CreateOutcome> {
        self.ctx.check_for_interrupt()?;

        if let Some(existing) = self.storage.lookup_collection(&entry.nss) {
            if !entry.sharded {
                return Err(CloneError::NamespaceConflict {
                    nss: entry.nss.clone(),
                });
            }
            let remote = entry.remote_uuid()?;
            if existing.uuid == remote {
                return Ok(CreateOutcome::AlreadyPresent);
            }
            return Err(CloneError::IdentityConflict {
                nss: entry.nss.clone(),
                existing: existing.uuid,
                remote,
            });
        }

        let options = entry.creation_options()?;
        let mut unit = self.storage.begin_unit();
        unit.create_collection(&entry.nss, &options, entry.id_index.as_ref(), true)?;
        unit.commit()?;
        Ok(CreateOutcome::Created)
    }
}
