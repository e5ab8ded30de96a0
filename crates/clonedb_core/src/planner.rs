//! Collection planner: turns the remote catalog into a creation plan.
//!
//! Planning only talks to the remote source, so it runs with the database
//! lock released.

use crate::catalog::{
    find_identity_index, CollectionKind, CollectionOptions, CollectionUuid, IndexSpec,
    RemoteCollectionDescriptor,
};
use crate::error::{CloneError, CloneResult};
use crate::lock::DatabaseLock;
use crate::namespace::Namespace;
use crate::remote::{CollectionFilter, RemoteSource};
use std::collections::BTreeMap;
use tracing::debug;

/// Plan for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationPlanEntry {
    /// Target namespace.
    pub nss: Namespace,
    /// Catalog entry as reported by the source.
    pub descriptor: RemoteCollectionDescriptor,
    /// Parsed creation options.
    pub options: CollectionOptions,
    /// Identity index to create the collection with; `None` lets the
    /// storage engine synthesize its default.
    pub id_index: Option<IndexSpec>,
    /// Whether an external sharding layer owns the documents.
    pub sharded: bool,
}

impl CreationPlanEntry {
    /// Identity of the collection on the source.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError::InvalidOptions`] if the listing carried none.
    pub fn remote_uuid(&self) -> CloneResult<CollectionUuid> {
        self.descriptor
            .info
            .uuid
            .ok_or_else(|| CloneError::InvalidOptions {
                nss: self.nss.clone(),
                message: "remote collection info has no uuid".into(),
            })
    }

    /// Options to create the local collection with.
    ///
    /// Sharded collections keep the source identity; unsharded collections
    /// get a fresh one from the storage engine.
    pub fn creation_options(&self) -> CloneResult<CollectionOptions> {
        let mut options = self.options.clone();
        options.uuid = if self.sharded {
            Some(self.remote_uuid()?)
        } else {
            None
        };
        Ok(options)
    }
}

/// The full plan for a database clone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClonePlan {
    /// Collections in the order they are processed.
    pub entries: Vec<CreationPlanEntry>,
    /// Remote index specs for every planned namespace.
    pub index_specs: BTreeMap<Namespace, Vec<IndexSpec>>,
}

impl ClonePlan {
    /// Remote index specs for `nss`; empty if none were listed.
    #[must_use]
    pub fn index_specs_for(&self, nss: &Namespace) -> &[IndexSpec] {
        self.index_specs.get(nss).map_or(&[], Vec::as_slice)
    }
}

/// Fetches the remote catalog of `db` and builds the clone plan.
///
/// The lock is released for the duration and held again on return.
pub fn plan_clone(
    source: &mut dyn RemoteSource,
    lock: &mut DatabaseLock<'_>,
    db: &str,
    sharded: &[Namespace],
) -> CloneResult<ClonePlan> {
    lock.with_released(|| {
        let listing = source.list_collections(db, CollectionFilter::CollectionsOnly)?;
        let mut entries = filter_collections(db, listing, sharded)?;

        let mut index_specs = BTreeMap::new();
        for entry in &mut entries {
            let specs = source.list_indexes(&entry.nss)?;
            if entry.id_index.is_none() {
                entry.id_index = find_identity_index(&specs).cloned();
            }
            index_specs.insert(entry.nss.clone(), specs);
        }

        Ok(ClonePlan {
            entries,
            index_specs,
        })
    })
}

/// Drops views and restricted system collections and parses options.
pub fn filter_collections(
    db: &str,
    listing: Vec<RemoteCollectionDescriptor>,
    sharded: &[Namespace],
) -> CloneResult<Vec<CreationPlanEntry>> {
    let mut entries = Vec::with_capacity(listing.len());
    for descriptor in listing {
        let nss = Namespace::new(db, descriptor.name.clone());
        debug!(ns = %nss, "cloner got collection");

        if descriptor.kind == CollectionKind::View {
            debug!(ns = %nss, "not cloning because view");
            continue;
        }

        let options =
            CollectionOptions::parse(&descriptor.options).map_err(|message| {
                CloneError::InvalidOptions {
                    nss: nss.clone(),
                    message,
                }
            })?;

        if nss.is_system() && !nss.is_legal_client_system() {
            debug!(ns = %nss, "not cloning because system collection");
            continue;
        }

        let is_sharded = sharded.contains(&nss);
        entries.push(CreationPlanEntry {
            id_index: descriptor.id_index.clone(),
            nss,
            descriptor,
            options,
            sharded: is_sharded,
        });
    }
    Ok(entries)
}
