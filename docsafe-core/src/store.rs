//! The root store handle.
//!
//! A [`DocumentStore`] owns the [`Context`] that every collection and query created
//! from it shares. Handles built from the same store take part in the same
//! transaction or batch, which is how one scope spans several collections.
//!
//! # Example
//!
//! ```ignore
//! use docsafe::{prelude::*, memory::InMemoryStore};
//!
//! let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//! let users = store.collection::<User>("users");
//! let audit = store.collection::<AuditEntry>("audit");
//!
//! store
//!     .run_transaction(move |_| async move {
//!         users.set(&user).await?;
//!         audit.add(&entry).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

use bson::Document;
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc};

use crate::{
    backend::{BatchRef, QueryTarget, StoreBackend, TransactionRef},
    collection::{Collection, CollectionFactory},
    context::Context,
    converter::Converter,
    document::Record,
    error::DocumentStoreResult,
    expr::StructuredQuery,
    query::Query,
    snapshot::WriteResult,
};

/// A document store bound to a backend.
///
/// Cloning the store is cheap; clones share the same context.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    context: Arc<Context>,
}

impl DocumentStore {
    /// Creates a new document store with the given backend.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Creates a store over a backend that is already shared.
    pub fn from_arc(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            context: Arc::new(Context::new(backend)),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        self.context.backend()
    }

    /// Gets a collection that uses the structural converter.
    pub fn collection<T: Record>(&self, path: impl Into<String>) -> Collection<T> {
        self.collection_with(path, Converter::new())
    }

    /// Gets a collection that uses the given converter.
    pub fn collection_with<T, S>(&self, path: impl Into<String>, converter: Converter<T, S>) -> Collection<T, S>
    where
        T: Record,
        S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
    {
        Collection::new(path.into(), self.context.clone(), Arc::new(converter))
    }

    /// Binds a converter once and creates collections at any number of paths.
    pub fn collection_factory<T, S>(&self, converter: Converter<T, S>) -> CollectionFactory<T, S>
    where
        T: Record,
        S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
    {
        CollectionFactory::new(self.context.clone(), Arc::new(converter))
    }

    /// A query over every collection whose last path segment is `collection_id`.
    pub fn collection_group<T, S>(&self, collection_id: impl Into<String>, converter: Converter<T, S>) -> Query<T, S>
    where
        T: Record,
        S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
    {
        Query::new(
            self.context.clone(),
            Arc::new(converter),
            QueryTarget::CollectionGroup(collection_id.into()),
            StructuredQuery::new(),
        )
    }

    /// See [`Context::run_transaction`].
    pub async fn run_transaction<F, Fut, R>(&self, f: F) -> DocumentStoreResult<R>
    where
        F: FnOnce(TransactionRef) -> Fut,
        Fut: Future<Output = DocumentStoreResult<R>>,
    {
        self.context.run_transaction(f).await
    }

    /// See [`Context::run_batch`].
    pub async fn run_batch<F, Fut>(&self, f: F) -> DocumentStoreResult<Vec<WriteResult>>
    where
        F: FnOnce(BatchRef) -> Fut,
        Fut: Future<Output = DocumentStoreResult<()>>,
    {
        self.context.run_batch(f).await
    }
}

/// Shorthand for a collection over raw documents.
pub type DocumentCollection = Collection<Document>;
