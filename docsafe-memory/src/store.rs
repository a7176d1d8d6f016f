//! In-memory storage implementation for document stores.
//!
//! Documents live in ordered maps behind an async-aware read-write lock. Every
//! commit takes the write lock, stages its writes against the current data,
//! and swaps the staged documents in only when every write succeeded, so a
//! commit is all-or-nothing. Listeners are notified while the lock is still
//! held, which keeps notifications in commit order.

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use mea::rwlock::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, trace};

use docsafe_core::{
    backend::{
        BatchRef, ListenerRegistration, QueryTarget, SnapshotCallback, StoreBackend, StoreBackendBuilder,
        TransactionRef, Write,
    },
    error::{DocumentStoreError, DocumentStoreResult},
    expr::StructuredQuery,
    snapshot::{DocumentSnapshot, QuerySnapshot, WriteResult},
};

use crate::{
    apply::{apply_update, resolve_set},
    execute::execute,
    listener::Listeners,
    transaction::{MemoryBatch, MemoryTransaction},
};

/// A document as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredDocument {
    pub(crate) data: Document,
    pub(crate) create_time: DateTime<Utc>,
    pub(crate) update_time: DateTime<Utc>,
    /// Commit sequence number of the last write to this document.
    pub(crate) version: u64,
}

impl StoredDocument {
    pub(crate) fn snapshot(&self, collection: &str, id: &str) -> DocumentSnapshot {
        DocumentSnapshot::new(collection, id, self.data.clone()).with_times(self.create_time, self.update_time)
    }
}

/// document id -> document
pub(crate) type CollectionMap = BTreeMap<String, StoredDocument>;
/// collection path -> documents
pub(crate) type StoreMap = BTreeMap<String, CollectionMap>;

/// Document address -> version seen by a transaction (`None` when it did not exist).
pub(crate) type ReadSet = HashMap<(String, String), Option<u64>>;

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type Staged = BTreeMap<(String, String), Option<StoredDocument>>;

struct Shared {
    data: RwLock<StoreMap>,
    listeners: Listeners,
    sequence: AtomicU64,
    id_generator: IdGenerator,
    clock: Clock,
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so
/// clones share the same documents, listeners and id generator. Two
/// [`DocumentStore`](docsafe_core::store::DocumentStore)s built over clones of
/// one `InMemoryStore` behave like two clients of the same database.
///
/// Transactions are optimistic: reads record the version of each document and
/// commit fails with [`Aborted`](DocumentStoreError::Aborted) if any of them has
/// changed since.
///
/// # Example
///
/// ```ignore
/// use docsafe_memory::InMemoryStore;
/// use docsafe::backend::{StoreBackend, StoreBackendBuilder};
/// use bson::doc;
///
/// let store = InMemoryStore::builder().build().await?;
/// let id = store.add_document("users", doc! { "name": "Alice" }).await?;
///
/// assert!(store.get_document("users", &id).await?.exists());
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates an empty store with random ids and the system clock.
    pub fn new() -> Self {
        InMemoryStoreBuilder::default().finish()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Reads one document along with its version.
    pub(crate) async fn read_document(&self, collection: &str, id: &str) -> (DocumentSnapshot, Option<u64>) {
        let data = self.shared.data.read().await;

        match data.get(collection).and_then(|documents| documents.get(id)) {
            Some(stored) => (stored.snapshot(collection, id), Some(stored.version)),
            None => (DocumentSnapshot::missing(collection, id), None),
        }
    }

    /// Runs a query and reports the version of every returned document.
    pub(crate) async fn read_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<(Vec<DocumentSnapshot>, Vec<((String, String), u64)>)> {
        let data = self.shared.data.read().await;
        let docs = execute(&data, target, query)?;

        let versions = docs
            .iter()
            .filter_map(|doc| {
                data.get(doc.collection())
                    .and_then(|documents| documents.get(doc.id()))
                    .map(|stored| ((doc.collection().to_owned(), doc.id().to_owned()), stored.version))
            })
            .collect();

        Ok((docs, versions))
    }

    /// Applies `writes` atomically.
    ///
    /// When `reads` is given, every recorded version must still be current or the
    /// commit fails with [`Aborted`](DocumentStoreError::Aborted) and nothing is
    /// applied.
    pub(crate) async fn apply(
        &self,
        writes: Vec<Write>,
        reads: Option<&ReadSet>,
    ) -> DocumentStoreResult<Vec<WriteResult>> {
        let mut data = self.shared.data.write().await;

        if let Some(reads) = reads {
            for ((collection, id), seen) in reads {
                let latest = data
                    .get(collection)
                    .and_then(|documents| documents.get(id))
                    .map(|stored| stored.version);

                if latest != *seen {
                    debug!(collection = %collection, id = %id, "commit aborted by a concurrent write");
                    return Err(DocumentStoreError::Aborted(format!(
                        "document {collection}/{id} changed after it was read"
                    )));
                }
            }
        }

        let count = writes.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let now = (self.shared.clock)();
        let version = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut staged = Staged::new();

        for write in writes {
            trace!(collection = %write.collection(), id = %write.id(), "staging write");

            match write {
                Write::Set { collection, id, data: fields } => {
                    let create_time = current(&data, &staged, &collection, &id)
                        .map(|stored| stored.create_time)
                        .unwrap_or(now);

                    let stored = StoredDocument {
                        data: resolve_set(fields, now)?,
                        create_time,
                        update_time: now,
                        version,
                    };
                    staged.insert((collection, id), Some(stored));
                }
                Write::Update { collection, id, fields } => {
                    let Some(existing) = current(&data, &staged, &collection, &id) else {
                        return Err(DocumentStoreError::DocumentNotFound(id, collection));
                    };

                    let stored = StoredDocument {
                        data: apply_update(existing.data.clone(), fields, now)?,
                        create_time: existing.create_time,
                        update_time: now,
                        version,
                    };
                    staged.insert((collection, id), Some(stored));
                }
                Write::Delete { collection, id } => {
                    staged.insert((collection, id), None);
                }
            }
        }

        for ((collection, id), state) in staged {
            match state {
                Some(stored) => {
                    data.entry(collection)
                        .or_default()
                        .insert(id, stored);
                }
                None => {
                    if let Some(documents) = data.get_mut(&collection) {
                        documents.remove(&id);
                        if documents.is_empty() {
                            data.remove(&collection);
                        }
                    }
                }
            }
        }

        debug!(writes = count, version, "commit applied");
        self.shared.listeners.notify(&data);

        Ok(vec![WriteResult { update_time: now }; count])
    }
}

/// The document at an address as seen by a commit in progress.
fn current<'a>(data: &'a StoreMap, staged: &'a Staged, collection: &str, id: &str) -> Option<&'a StoredDocument> {
    match staged.get(&(collection.to_owned(), id.to_owned())) {
        Some(state) => state.as_ref(),
        None => data.get(collection).and_then(|documents| documents.get(id)),
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("version", &self.shared.sequence.load(Ordering::SeqCst))
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn new_document_id(&self) -> String {
        (self.shared.id_generator)()
    }

    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot> {
        Ok(self.read_document(collection, id).await.0)
    }

    async fn run_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot> {
        let data = self.shared.data.read().await;
        Ok(QuerySnapshot::new(execute(&data, target, query)?))
    }

    async fn add_document(&self, collection: &str, data: Document) -> DocumentStoreResult<String> {
        let id = self.new_document_id();

        self.apply(
            vec![Write::Set {
                collection: collection.to_owned(),
                id: id.clone(),
                data,
            }],
            None,
        )
        .await?;

        Ok(id)
    }

    async fn commit(&self, writes: Vec<Write>) -> DocumentStoreResult<Vec<WriteResult>> {
        self.apply(writes, None).await
    }

    async fn begin_transaction(&self) -> DocumentStoreResult<TransactionRef> {
        Ok(Arc::new(MemoryTransaction::new(self.clone())))
    }

    async fn begin_batch(&self) -> DocumentStoreResult<BatchRef> {
        Ok(Arc::new(MemoryBatch::new(self.clone())))
    }

    async fn listen(
        &self,
        target: QueryTarget,
        query: StructuredQuery,
        callback: SnapshotCallback,
    ) -> DocumentStoreResult<ListenerRegistration> {
        // Holding the read lock keeps commits out until the listener is registered.
        let data = self.shared.data.read().await;
        self.shared
            .listeners
            .register(&data, target, query, callback)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docsafe_memory::InMemoryStore;
/// use docsafe::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder()
///     .with_id_generator(|| "fixed".to_string())
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    id_generator: Option<IdGenerator>,
    clock: Option<Clock>,
}

impl InMemoryStoreBuilder {
    /// Replaces the random id generator used for new documents.
    pub fn with_id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Replaces the clock used for commit and server timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    fn finish(self) -> InMemoryStore {
        let id_generator = self.id_generator.unwrap_or_else(random_ids);
        let clock = self.clock.unwrap_or_else(system_clock);

        InMemoryStore {
            shared: Arc::new(Shared {
                data: RwLock::new(StoreMap::new()),
                listeners: Listeners::default(),
                sequence: AtomicU64::new(0),
                id_generator,
                clock,
            }),
        }
    }
}

fn random_ids() -> IdGenerator {
    Arc::new(|| uuid::Uuid::new_v4().simple().to_string())
}

fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{DateTime as BsonDateTime, doc};
    use chrono::TimeZone;
    use docsafe_core::value::FieldValue;
    use std::sync::atomic::AtomicUsize;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn set(collection: &str, id: &str, data: Document) -> Write {
        Write::Set {
            collection: collection.into(),
            id: id.into(),
            data,
        }
    }

    #[tokio::test]
    async fn builder_options_drive_ids_and_timestamps() {
        let counter = Arc::new(AtomicUsize::new(0));
        let next = counter.clone();
        let store = InMemoryStore::builder()
            .with_id_generator(move || format!("doc-{}", next.fetch_add(1, Ordering::SeqCst)))
            .with_clock(fixed_time)
            .build()
            .await
            .unwrap();

        let id = store
            .add_document("users", doc! { "joined": FieldValue::server_timestamp() })
            .await
            .unwrap();
        assert_eq!(id, "doc-0");

        let snapshot = store.get_document("users", "doc-0").await.unwrap();
        assert_eq!(snapshot.get("joined"), Some(&bson::Bson::DateTime(BsonDateTime::from_chrono(fixed_time()))));
        assert_eq!(snapshot.create_time(), Some(fixed_time()));
    }

    #[tokio::test]
    async fn failed_commits_apply_nothing() {
        let store = InMemoryStore::new();

        let err = store
            .commit(vec![
                set("users", "u1", doc! { "name": "Ada" }),
                Write::Update {
                    collection: "users".into(),
                    id: "missing".into(),
                    fields: doc! { "name": "x" },
                },
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::DocumentNotFound(id, coll) if id == "missing" && coll == "users"));
        assert!(!store.get_document("users", "u1").await.unwrap().exists());
    }

    #[tokio::test]
    async fn writes_in_one_commit_see_each_other() {
        let store = InMemoryStore::new();

        let results = store
            .commit(vec![
                set("counters", "c1", doc! { "count": 1 }),
                Write::Update {
                    collection: "counters".into(),
                    id: "c1".into(),
                    fields: doc! { "count": FieldValue::increment(2) },
                },
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let snapshot = store.get_document("counters", "c1").await.unwrap();
        assert_eq!(snapshot.data(), Some(&doc! { "count": 3 }));
    }

    #[tokio::test]
    async fn set_keeps_the_create_time() {
        let store = InMemoryStore::new();
        store.commit(vec![set("users", "u1", doc! { "v": 1 })]).await.unwrap();
        let first = store.get_document("users", "u1").await.unwrap();

        store.commit(vec![set("users", "u1", doc! { "v": 2 })]).await.unwrap();
        let second = store.get_document("users", "u1").await.unwrap();

        assert_eq!(first.create_time(), second.create_time());
        assert_eq!(second.data(), Some(&doc! { "v": 2 }));
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let store = InMemoryStore::new();
        store.commit(vec![set("users", "u1", doc! {})]).await.unwrap();

        for _ in 0..2 {
            store
                .commit(vec![Write::Delete { collection: "users".into(), id: "u1".into() }])
                .await
                .unwrap();
        }

        assert!(!store.get_document("users", "u1").await.unwrap().exists());
    }

    #[tokio::test]
    async fn stale_reads_abort_the_commit() {
        let store = InMemoryStore::new();
        store.commit(vec![set("users", "u1", doc! { "v": 1 })]).await.unwrap();

        let (_, version) = store.read_document("users", "u1").await;
        let reads = ReadSet::from([(("users".to_string(), "u1".to_string()), version)]);

        store.commit(vec![set("users", "u1", doc! { "v": 2 })]).await.unwrap();

        let err = store
            .apply(vec![set("users", "u1", doc! { "v": 3 })], Some(&reads))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Aborted(_)));

        let snapshot = store.get_document("users", "u1").await.unwrap();
        assert_eq!(snapshot.data(), Some(&doc! { "v": 2 }));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryStore::new();
        let clone = store.clone();

        store.commit(vec![set("users", "u1", doc! {})]).await.unwrap();
        assert!(clone.get_document("users", "u1").await.unwrap().exists());
    }

    #[tokio::test]
    async fn dropped_listener_guards_leave_the_table() {
        let store = InMemoryStore::new();
        let target = || QueryTarget::Collection("users".into());

        let kept = store
            .listen(target(), StructuredQuery::new(), Box::new(|_| {}))
            .await
            .unwrap();
        let guard = store
            .listen(target(), StructuredQuery::new(), Box::new(|_| {}))
            .await
            .unwrap()
            .unsubscribe_on_drop();
        assert_eq!(store.shared.listeners.len(), 2);

        drop(guard);
        assert_eq!(store.shared.listeners.len(), 1);

        kept.unsubscribe();
        assert_eq!(store.shared.listeners.len(), 0);
    }
}
