//! Storage backend abstraction for the document store.
//!
//! This module defines the seam between the typed data-access layer and the database
//! client. Everything above it (collections, queries, scopes) is written against
//! these traits only.
//!
//! # Traits
//!
//! - [`StoreBackend`]: Direct reads and writes, plus the factories for scoped handles
//! - [`StoreTransaction`]: A read-then-write unit of work with all-or-nothing commit
//! - [`StoreBatch`]: A write-only buffer committed atomically
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docsafe::backend::{StoreBackend, Write};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend
//!     .commit(vec![Write::Set {
//!         collection: "users".into(),
//!         id: "u1".into(),
//!         data: doc! { "name": "Alice" },
//!     }])
//!     .await?;
//!
//! let snapshot = backend.get_document("users", "u1").await?;
//! assert!(snapshot.exists());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::{fmt, fmt::Debug, sync::Arc};

use crate::{
    error::DocumentStoreResult,
    expr::StructuredQuery,
    snapshot::{DocumentSnapshot, QuerySnapshot, WriteResult},
};

/// A shared handle to an open transaction.
pub type TransactionRef = Arc<dyn StoreTransaction>;

/// A shared handle to an open batch.
pub type BatchRef = Arc<dyn StoreBatch>;

/// Receives every snapshot a listener produces, starting with the initial one.
pub type SnapshotCallback = Box<dyn Fn(QuerySnapshot) + Send + Sync>;

/// A single mutation, as queued in a transaction or batch or committed directly.
///
/// Values may contain [`FieldValue`](crate::value::FieldValue) sentinels; the
/// backend resolves them when the write is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Creates the document or replaces its full contents.
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    /// Merges fields into an existing document. Keys may be dotted paths.
    ///
    /// Fails with [`DocumentNotFound`](crate::error::DocumentStoreError::DocumentNotFound)
    /// when the document does not exist.
    Update {
        collection: String,
        id: String,
        fields: Document,
    },
    /// Removes the document. Deleting a missing document is not an error.
    Delete { collection: String, id: String },
}

impl Write {
    /// The collection path the write targets.
    pub fn collection(&self) -> &str {
        match self {
            Write::Set { collection, .. }
            | Write::Update { collection, .. }
            | Write::Delete { collection, .. } => collection,
        }
    }

    /// The identity of the document the write targets.
    pub fn id(&self) -> &str {
        match self {
            Write::Set { id, .. } | Write::Update { id, .. } | Write::Delete { id, .. } => id,
        }
    }
}

/// The set of documents a query runs over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    /// All documents directly inside the collection at this path.
    Collection(String),
    /// All documents in every collection whose final path segment is this id.
    CollectionGroup(String),
}

impl QueryTarget {
    /// Returns `true` if documents of the collection at `path` belong to this target.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            QueryTarget::Collection(target) => target == path,
            QueryTarget::CollectionGroup(group) => path.rsplit('/').next() == Some(group.as_str()),
        }
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Collection(path) => write!(f, "{path}"),
            QueryTarget::CollectionGroup(group) => write!(f, "*/{group}"),
        }
    }
}

/// Handle for a live query subscription.
///
/// Dropping the registration leaves the listener running; call
/// [`unsubscribe`](Self::unsubscribe) to stop delivery, or turn it into a
/// [`ListenerGuard`] with [`unsubscribe_on_drop`](Self::unsubscribe_on_drop).
#[must_use = "the listener keeps running until `unsubscribe` is called"]
pub struct ListenerRegistration {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerRegistration {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { unsubscribe: Some(Box::new(unsubscribe)) }
    }

    /// Stops delivery. No callback is invoked for changes committed afterwards.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Ties the listener to the returned guard: it stops when the guard drops.
    pub fn unsubscribe_on_drop(self) -> ListenerGuard {
        ListenerGuard { registration: Some(self) }
    }
}

/// Scoped listener handle returned by [`ListenerRegistration::unsubscribe_on_drop`].
#[must_use = "dropping the guard stops the listener immediately"]
#[derive(Debug)]
pub struct ListenerGuard {
    registration: Option<ListenerRegistration>,
}

impl ListenerGuard {
    /// Hands the listener back without stopping it.
    pub fn detach(mut self) -> ListenerRegistration {
        self.registration
            .take()
            .unwrap_or_else(|| ListenerRegistration { unsubscribe: None })
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.unsubscribe();
        }
    }
}

impl Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Abstract interface for document storage backends.
///
/// Implementers provide reads, atomic multi-document commits, and the factories
/// for transactions, batches and live listeners.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific but should be
/// documented by the implementer.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Errors raised by the underlying store are passed through to the caller unchanged.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Generates a fresh document identity without touching the store.
    fn new_document_id(&self) -> String;

    /// Reads one document. A missing document yields a snapshot whose
    /// [`exists`](DocumentSnapshot::exists) is `false`.
    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot>;

    /// Runs a query and returns the matching documents in query order.
    async fn run_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot>;

    /// Stores a new document under a store-generated identity and returns that identity.
    async fn add_document(&self, collection: &str, data: Document) -> DocumentStoreResult<String>;

    /// Applies the writes atomically: either all of them take effect or none does.
    ///
    /// # Returns
    ///
    /// One [`WriteResult`] per write, in the same order.
    async fn commit(&self, writes: Vec<Write>) -> DocumentStoreResult<Vec<WriteResult>>;

    /// Opens a transaction.
    async fn begin_transaction(&self) -> DocumentStoreResult<TransactionRef>;

    /// Opens a write batch.
    async fn begin_batch(&self) -> DocumentStoreResult<BatchRef>;

    /// Subscribes to a query.
    ///
    /// The callback receives the current results first, then a new snapshot after
    /// every commit that changes them, until the registration is unsubscribed.
    async fn listen(
        &self,
        target: QueryTarget,
        query: StructuredQuery,
        callback: SnapshotCallback,
    ) -> DocumentStoreResult<ListenerRegistration>;
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    fn new_document_id(&self) -> String {
        (**self).new_document_id()
    }

    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot> {
        (**self)
            .get_document(collection, id)
            .await
    }

    async fn run_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot> {
        (**self)
            .run_query(target, query)
            .await
    }

    async fn add_document(&self, collection: &str, data: Document) -> DocumentStoreResult<String> {
        (**self)
            .add_document(collection, data)
            .await
    }

    async fn commit(&self, writes: Vec<Write>) -> DocumentStoreResult<Vec<WriteResult>> {
        (**self).commit(writes).await
    }

    async fn begin_transaction(&self) -> DocumentStoreResult<TransactionRef> {
        (**self).begin_transaction().await
    }

    async fn begin_batch(&self) -> DocumentStoreResult<BatchRef> {
        (**self).begin_batch().await
    }

    async fn listen(
        &self,
        target: QueryTarget,
        query: StructuredQuery,
        callback: SnapshotCallback,
    ) -> DocumentStoreResult<ListenerRegistration> {
        (**self)
            .listen(target, query, callback)
            .await
    }
}

/// An open transaction.
///
/// All reads must happen before the first write is enqueued. Commit applies the
/// queued writes atomically and fails if any document read by the transaction has
/// changed since it was read.
#[async_trait]
pub trait StoreTransaction: Send + Sync + Debug {
    /// Reads one document and records its version for commit-time validation.
    ///
    /// # Errors
    ///
    /// Returns [`ReadAfterWrite`](crate::error::DocumentStoreError::ReadAfterWrite)
    /// if a write has already been enqueued.
    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot>;

    /// Runs a query inside the transaction, recording every returned document.
    async fn run_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot>;

    /// Queues a write. Nothing is visible to other readers until commit.
    fn enqueue(&self, write: Write) -> DocumentStoreResult<()>;

    async fn commit(&self) -> DocumentStoreResult<Vec<WriteResult>>;

    /// Discards queued writes. Nothing is applied.
    async fn rollback(&self) -> DocumentStoreResult<()>;
}

/// An open write batch. Batches hold no reads.
#[async_trait]
pub trait StoreBatch: Send + Sync + Debug {
    fn enqueue(&self, write: Write) -> DocumentStoreResult<()>;

    /// Applies all queued writes atomically.
    async fn commit(&self) -> DocumentStoreResult<Vec<WriteResult>>;
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
