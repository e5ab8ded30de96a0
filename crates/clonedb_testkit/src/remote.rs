//! In-memory remote source.

use clonedb_codec::{DocumentValidator, RawDocument};
use clonedb_core::{
    CollectionFilter, CollectionKind, CollectionUuid, DocumentCursor, Endpoint, IndexSpec,
    InternalCredential, Namespace, QueryRequest, RemoteCollectionDescriptor, RemoteConnector,
    RemoteError, RemoteResult, RemoteSource,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Batch size used when a query leaves the choice to the source.
pub const DEFAULT_REMOTE_BATCH_SIZE: usize = 101;

/// One collection held by the remote source.
#[derive(Debug, Clone)]
pub struct RemoteCollection {
    /// Catalog entry.
    pub descriptor: RemoteCollectionDescriptor,
    /// Index specs, identity index included.
    pub indexes: Vec<IndexSpec>,
    /// Serialized documents in natural order.
    pub documents: Vec<RawDocument>,
}

impl RemoteCollection {
    /// A collection with a fresh identity and the default identity index.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: RemoteCollectionDescriptor::collection(name)
                .with_uuid(CollectionUuid::generate()),
            indexes: vec![IndexSpec::identity()],
            documents: Vec::new(),
        }
    }

    /// A view; listed by the catalog but never cloned.
    pub fn view(name: impl Into<String>) -> Self {
        let mut collection = Self::new(name);
        collection.descriptor.kind = CollectionKind::View;
        collection.indexes.clear();
        collection
    }

    /// Adds documents.
    #[must_use]
    pub fn with_documents(mut self, documents: impl IntoIterator<Item = RawDocument>) -> Self {
        self.documents.extend(documents);
        self
    }

    /// Adds an index spec.
    #[must_use]
    pub fn with_index(mut self, spec: IndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }

    /// Embeds the identity index in the catalog entry.
    #[must_use]
    pub fn with_embedded_id_index(mut self) -> Self {
        self.descriptor.id_index = Some(IndexSpec::identity());
        self
    }

    /// Replaces the descriptor's options document.
    #[must_use]
    pub fn with_options(mut self, options: clonedb_core::OptionsDocument) -> Self {
        self.descriptor.options = options;
        self
    }

    /// Returns the identity reported in the catalog.
    #[must_use]
    pub fn uuid(&self) -> Option<CollectionUuid> {
        self.descriptor.info.uuid
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    address: String,
    unreachable: bool,
    required_credential: Option<InternalCredential>,
    default_batch_size: usize,
    databases: BTreeMap<String, Vec<RemoteCollection>>,
    queries: Vec<QueryRequest>,
    failing_cursors: bool,
}

/// A remote source serving collections from memory.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    /// Creates an empty remote answering at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                address: address.into(),
                default_batch_size: DEFAULT_REMOTE_BATCH_SIZE,
                ..RemoteState::default()
            })),
        }
    }

    /// Adds a collection to `db`.
    pub fn add_collection(&self, db: &str, collection: RemoteCollection) {
        self.state
            .lock()
            .databases
            .entry(db.to_string())
            .or_default()
            .push(collection);
    }

    /// Makes connection attempts fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Requires sessions to authenticate with `credential`.
    pub fn require_credential(&self, credential: InternalCredential) {
        self.state.lock().required_credential = Some(credential);
    }

    /// Sets the batch size used when a query does not choose one.
    pub fn set_default_batch_size(&self, size: usize) {
        self.state.lock().default_batch_size = size.max(1);
    }

    /// Makes every cursor fail after its first batch.
    pub fn fail_cursors(&self) {
        self.state.lock().failing_cursors = true;
    }

    /// Queries received so far.
    #[must_use]
    pub fn queries(&self) -> Vec<QueryRequest> {
        self.state.lock().queries.clone()
    }
}

impl RemoteConnector for MemoryRemote {
    fn connect(&self, endpoint: &Endpoint) -> RemoteResult<Box<dyn RemoteSource>> {
        if self.state.lock().unreachable {
            return Err(RemoteError::Unreachable(endpoint.to_string()));
        }
        Ok(Box::new(MemorySession {
            remote: self.clone(),
            authenticated: false,
        }))
    }
}

struct MemorySession {
    remote: MemoryRemote,
    authenticated: bool,
}

impl MemorySession {
    fn check_auth(&self, command: &str) -> RemoteResult<()> {
        let state = self.remote.state.lock();
        if state.required_credential.is_some() && !self.authenticated {
            return Err(RemoteError::command(command, "unauthorized"));
        }
        Ok(())
    }

    fn collection(&self, nss: &Namespace) -> Option<RemoteCollection> {
        self.remote
            .state
            .lock()
            .databases
            .get(nss.db())
            .and_then(|colls| colls.iter().find(|c| c.descriptor.name == nss.coll()))
            .cloned()
    }
}

fn matches_filter(raw: &RawDocument, request: &QueryRequest) -> bool {
    if request.filter.is_empty() {
        return true;
    }
    match DocumentValidator::default().validate(raw) {
        Ok(doc) => request
            .filter
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value)),
        Err(_) => false,
    }
}

impl RemoteSource for MemorySession {
    fn server_address(&self) -> String {
        self.remote.state.lock().address.clone()
    }

    fn authenticate_internal(&mut self, credential: &InternalCredential) -> RemoteResult<()> {
        let state = self.remote.state.lock();
        match &state.required_credential {
            Some(required) if required != credential => Err(RemoteError::AuthenticationFailed(
                format!("bad credential for {}", credential.user),
            )),
            _ => {
                self.authenticated = true;
                Ok(())
            }
        }
    }

    fn list_collections(
        &mut self,
        db: &str,
        filter: CollectionFilter,
    ) -> RemoteResult<Vec<RemoteCollectionDescriptor>> {
        self.check_auth("listCollections")?;
        let state = self.remote.state.lock();
        Ok(state
            .databases
            .get(db)
            .map(|colls| {
                colls
                    .iter()
                    .filter(|c| {
                        filter == CollectionFilter::All
                            || c.descriptor.kind == CollectionKind::Collection
                    })
                    .map(|c| c.descriptor.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_indexes(&mut self, nss: &Namespace) -> RemoteResult<Vec<IndexSpec>> {
        self.check_auth("listIndexes")?;
        Ok(self.collection(nss).map(|c| c.indexes).unwrap_or_default())
    }

    fn query(
        &mut self,
        nss: &Namespace,
        request: &QueryRequest,
    ) -> RemoteResult<Box<dyn DocumentCursor + '_>> {
        self.check_auth("find")?;
        let documents = self.collection(nss).map(|c| c.documents).unwrap_or_default();

        let mut state = self.remote.state.lock();
        state.queries.push(request.clone());
        let batch_size = match request.batch_size {
            0 => state.default_batch_size,
            n => n as usize,
        };
        Ok(Box::new(MemoryCursor {
            documents: documents
                .into_iter()
                .filter(|raw| matches_filter(raw, request))
                .collect(),
            batch_size,
            fail_after_first: state.failing_cursors,
            batches: 0,
        }))
    }
}

struct MemoryCursor {
    documents: VecDeque<RawDocument>,
    batch_size: usize,
    fail_after_first: bool,
    batches: u64,
}

impl DocumentCursor for MemoryCursor {
    fn next_batch(&mut self) -> RemoteResult<Option<Vec<RawDocument>>> {
        if self.fail_after_first && self.batches > 0 {
            return Err(RemoteError::Cursor("connection reset".into()));
        }
        if self.documents.is_empty() {
            return Ok(None);
        }
        let take = self.batch_size.min(self.documents.len());
        self.batches += 1;
        Ok(Some(self.documents.drain(..take).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::numbered_docs;
    use clonedb_core::BatchStream;

    fn endpoint() -> Endpoint {
        Endpoint::single("donor", 27017)
    }

    #[test]
    fn batches_respect_requested_size() {
        let remote = MemoryRemote::new("donor:27017");
        remote.add_collection(
            "shop",
            RemoteCollection::new("orders").with_documents(numbered_docs(5)),
        );

        let mut session = remote.connect(&endpoint()).unwrap();
        let nss = Namespace::new("shop", "orders");
        let cursor = session.query(&nss, &QueryRequest::all_documents(2)).unwrap();
        let sizes: Vec<usize> = BatchStream::new(cursor).map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn listing_filters_views() {
        let remote = MemoryRemote::new("donor:27017");
        remote.add_collection("shop", RemoteCollection::new("orders"));
        remote.add_collection("shop", RemoteCollection::view("recent"));

        let mut session = remote.connect(&endpoint()).unwrap();
        let only = session
            .list_collections("shop", CollectionFilter::CollectionsOnly)
            .unwrap();
        assert_eq!(only.len(), 1);
        let all = session.list_collections("shop", CollectionFilter::All).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn authentication_is_enforced() {
        let remote = MemoryRemote::new("donor:27017");
        remote.require_credential(InternalCredential::new("__system", "key"));

        let mut session = remote.connect(&endpoint()).unwrap();
        assert!(session
            .list_collections("shop", CollectionFilter::CollectionsOnly)
            .is_err());
        assert!(session
            .authenticate_internal(&InternalCredential::new("__system", "wrong"))
            .is_err());
        session
            .authenticate_internal(&InternalCredential::new("__system", "key"))
            .unwrap();
        assert!(session
            .list_collections("shop", CollectionFilter::CollectionsOnly)
            .is_ok());
    }

    #[test]
    fn unreachable_remote_refuses_connections() {
        let remote = MemoryRemote::new("donor:27017");
        remote.set_unreachable(true);
        assert!(matches!(
            remote.connect(&endpoint()),
            Err(RemoteError::Unreachable(_))
        ));
    }
}
