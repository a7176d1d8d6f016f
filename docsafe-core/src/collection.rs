//! Typed handles over one collection path.
//!
//! A [`Collection`] encodes records on the way in, decodes them on the way out,
//! and routes every read and write through the [`Context`] it shares with the
//! store handle that created it:
//!
//! - an active transaction receives reads and queued writes,
//! - otherwise an active batch receives queued writes,
//! - otherwise the write is committed to the store immediately.
//!
//! # Example
//!
//! ```ignore
//! use docsafe::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! pub struct User {
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! let users = store.collection::<User>("users");
//! let id = users.add(&User { id: None, name: "Alice".into() }).await?;
//! let alice = users.fetch(&id).await?;
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::trace;

use crate::{
    backend::{ListenerRegistration, QueryTarget, Write},
    context::{Context, Scope},
    converter::Converter,
    document::{Record, serialize_document},
    error::{DocumentStoreError, DocumentStoreResult},
    expr::{Expr, FieldOp, SortDirection, StructuredQuery},
    query::Query,
    snapshot::{DocumentSnapshot, QuerySnapshot, WriteResult},
};

/// A typed collection bound to one path.
///
/// # Type Parameters
///
/// * `T` - The record type exposed to callers
/// * `S` - The storage shape produced by the converter's custom strategies
pub struct Collection<T, S = Document> {
    path: String,
    context: Arc<Context>,
    converter: Arc<Converter<T, S>>,
}

impl<T, S> Collection<T, S>
where
    T: Record,
    S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    pub(crate) fn new(path: String, context: Arc<Context>, converter: Arc<Converter<T, S>>) -> Self {
        Self { path, context, converter }
    }

    /// Returns the path of this collection.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn converter(&self) -> &Arc<Converter<T, S>> {
        &self.converter
    }

    /// Reads the raw snapshot for `id`, through the active transaction if there is one.
    ///
    /// The snapshot can be passed to a query cursor.
    pub async fn fetch_snapshot(&self, id: &str) -> DocumentStoreResult<DocumentSnapshot> {
        match self.context.transaction() {
            Some(transaction) => {
                trace!(collection = %self.path, id, "read via transaction");
                transaction
                    .get_document(&self.path, id)
                    .await
            }
            None => {
                self.context
                    .backend()
                    .get_document(&self.path, id)
                    .await
            }
        }
    }

    /// Fetches one record by identity.
    ///
    /// # Returns
    ///
    /// `None` if no document exists at `id`.
    pub async fn fetch(&self, id: &str) -> DocumentStoreResult<Option<T>> {
        let snapshot = self.fetch_snapshot(id).await?;

        if !snapshot.exists() {
            return Ok(None);
        }

        Ok(Some(self.converter.decode(&snapshot)?))
    }

    /// Fetches every record in the collection, in the store's enumeration order.
    pub async fn fetch_all(&self) -> DocumentStoreResult<Vec<T>> {
        self.query().fetch().await
    }

    /// Decodes a snapshot read from this collection.
    pub fn decode(&self, snapshot: &DocumentSnapshot) -> DocumentStoreResult<T> {
        self.converter.decode(snapshot)
    }

    /// Stores a new record and returns its identity.
    ///
    /// Any `id` carried by the record is ignored. Inside a transaction or batch the
    /// identity is generated before the write is queued, so it is returned even
    /// though the document is not stored until the scope commits.
    pub async fn add(&self, record: &T) -> DocumentStoreResult<String> {
        let data = self.converter.encode(record)?;

        match self.context.scope() {
            Some(scope) => {
                let id = self
                    .context
                    .backend()
                    .new_document_id();
                enqueue(
                    &scope,
                    Write::Set {
                        collection: self.path.clone(),
                        id: id.clone(),
                        data,
                    },
                )?;
                Ok(id)
            }
            None => {
                let id = self
                    .context
                    .backend()
                    .add_document(&self.path, data)
                    .await?;
                trace!(collection = %self.path, id = %id, "added");
                Ok(id)
            }
        }
    }

    /// Overwrites the document at the record's identity.
    ///
    /// # Errors
    ///
    /// Returns [`Validation`](DocumentStoreError::Validation) if the record has no `id`.
    pub async fn set(&self, record: &T) -> DocumentStoreResult<String> {
        let id = record
            .id()
            .ok_or_else(missing_id)?
            .to_owned();
        let data = self.converter.encode(record)?;

        self.write(Write::Set {
            collection: self.path.clone(),
            id: id.clone(),
            data,
        })
        .await?;

        Ok(id)
    }

    /// Calls [`set`](Self::set) when the record has an identity, [`add`](Self::add) otherwise.
    pub async fn add_or_set(&self, record: &T) -> DocumentStoreResult<String> {
        match record.id() {
            Some(_) => self.set(record).await,
            None => self.add(record).await,
        }
    }

    /// Applies a partial update.
    ///
    /// `patch` must serialize to a map with a string `id` key. The remaining keys are
    /// merged into the stored document; keys may be dotted paths and values may be
    /// [`FieldValue`](crate::value::FieldValue) directives. The patch is not passed
    /// through the converter.
    ///
    /// # Errors
    ///
    /// Returns [`Validation`](DocumentStoreError::Validation) if `id` is missing or
    /// empty. The store fails with
    /// [`DocumentNotFound`](DocumentStoreError::DocumentNotFound) when the
    /// document does not exist.
    pub async fn update<P>(&self, patch: &P) -> DocumentStoreResult<String>
    where
        P: Serialize + ?Sized,
    {
        let mut fields = serialize_document(patch)?;

        let id = match fields.remove("id") {
            Some(Bson::String(id)) if !id.is_empty() => id,
            _ => return Err(missing_id()),
        };

        self.write(Write::Update {
            collection: self.path.clone(),
            id: id.clone(),
            fields,
        })
        .await?;

        Ok(id)
    }

    /// Deletes the document at `id`. Deleting a missing document is not an error.
    pub async fn delete(&self, id: &str) -> DocumentStoreResult<String> {
        self.write(Write::Delete {
            collection: self.path.clone(),
            id: id.to_owned(),
        })
        .await?;

        Ok(id.to_owned())
    }

    /// Adds every record in one batch.
    ///
    /// # Errors
    ///
    /// Returns [`Concurrency`](DocumentStoreError::Concurrency) if a transaction or
    /// batch is already active.
    pub async fn bulk_add(&self, records: &[T]) -> DocumentStoreResult<Vec<WriteResult>> {
        self.context
            .run_batch(move |_| async move {
                for record in records {
                    self.add(record).await?;
                }
                Ok(())
            })
            .await
    }

    /// Sets every record in one batch. All records must carry an identity.
    pub async fn bulk_set(&self, records: &[T]) -> DocumentStoreResult<Vec<WriteResult>> {
        self.context
            .run_batch(move |_| async move {
                for record in records {
                    self.set(record).await?;
                }
                Ok(())
            })
            .await
    }

    /// Deletes every identity in one batch. Results follow the order of `ids`.
    pub async fn bulk_delete<I>(&self, ids: &[I]) -> DocumentStoreResult<Vec<WriteResult>>
    where
        I: AsRef<str> + Sync,
    {
        self.context
            .run_batch(move |_| async move {
                for id in ids {
                    self.delete(id.as_ref()).await?;
                }
                Ok(())
            })
            .await
    }

    /// A query over the whole collection.
    pub fn query(&self) -> Query<T, S> {
        Query::new(
            self.context.clone(),
            self.converter.clone(),
            QueryTarget::Collection(self.path.clone()),
            StructuredQuery::new(),
        )
    }

    /// Starts a query with a filter expression.
    pub fn filter(&self, expr: Expr) -> Query<T, S> {
        self.query().filter(expr)
    }

    /// Starts a query with a single field comparison.
    pub fn where_field(&self, field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Query<T, S> {
        self.query().where_field(field, op, value)
    }

    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> Query<T, S> {
        self.query().order_by(field, direction)
    }

    pub fn limit(&self, limit: usize) -> Query<T, S> {
        self.query().limit(limit)
    }

    pub fn offset(&self, offset: usize) -> Query<T, S> {
        self.query().offset(offset)
    }

    /// Subscribes to every change in the collection.
    ///
    /// See [`Query::on_snapshot`].
    pub async fn on_snapshot<F>(&self, callback: F) -> DocumentStoreResult<ListenerRegistration>
    where
        F: Fn(&QuerySnapshot, &dyn Fn(&DocumentSnapshot) -> DocumentStoreResult<T>) + Send + Sync + 'static,
    {
        self.query().on_snapshot(callback).await
    }

    async fn write(&self, write: Write) -> DocumentStoreResult<()> {
        match self.context.scope() {
            Some(scope) => enqueue(&scope, write),
            None => {
                trace!(collection = %self.path, id = write.id(), "direct write");
                self.context
                    .backend()
                    .commit(vec![write])
                    .await?;
                Ok(())
            }
        }
    }
}

fn enqueue(scope: &Scope, write: Write) -> DocumentStoreResult<()> {
    match scope {
        Scope::Transaction(transaction) => {
            trace!(collection = write.collection(), id = write.id(), "queued on transaction");
            transaction.enqueue(write)
        }
        Scope::Batch(batch) => {
            trace!(collection = write.collection(), id = write.id(), "queued on batch");
            batch.enqueue(write)
        }
    }
}

fn missing_id() -> DocumentStoreError {
    DocumentStoreError::Validation("missing id".into())
}

impl<T, S> Clone for Collection<T, S> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            context: self.context.clone(),
            converter: self.converter.clone(),
        }
    }
}

impl<T, S> fmt::Debug for Collection<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("converter", &self.converter)
            .finish()
    }
}

/// Creates collections at many paths with one shared converter.
///
/// Useful for sub-collections such as `users/{uid}/reviews`.
pub struct CollectionFactory<T, S = Document> {
    context: Arc<Context>,
    converter: Arc<Converter<T, S>>,
}

impl<T, S> CollectionFactory<T, S>
where
    T: Record,
    S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    pub(crate) fn new(context: Arc<Context>, converter: Arc<Converter<T, S>>) -> Self {
        Self { context, converter }
    }

    pub fn create(&self, path: impl Into<String>) -> Collection<T, S> {
        Collection::new(path.into(), self.context.clone(), self.converter.clone())
    }
}

impl<T, S> Clone for CollectionFactory<T, S> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            converter: self.converter.clone(),
        }
    }
}

impl<T, S> fmt::Debug for CollectionFactory<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionFactory")
            .field("converter", &self.converter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{document::RecordId, testing::RecordingBackend, value::FieldValue};
    use bson::doc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: Option<String>,
        title: String,
    }

    impl Record for Post {
        fn id(&self) -> Option<&str> {
            self.id.as_record_id()
        }
    }

    fn posts() -> (Arc<RecordingBackend>, Collection<Post>) {
        let backend = Arc::new(RecordingBackend::default());
        let context = Arc::new(Context::new(backend.clone()));
        let posts = Collection::new("posts".into(), context, Arc::new(Converter::new()));
        (backend, posts)
    }

    #[tokio::test]
    async fn set_without_id_fails_before_the_store() {
        let (backend, posts) = posts();

        let err = posts
            .set(&Post { id: None, title: "a".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Validation(message) if message == "missing id"));

        let err = posts
            .update(&doc! { "title": "b" })
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Validation(_)));

        let err = posts
            .update(&doc! { "id": "", "title": "b" })
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Validation(_)));

        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn direct_writes_commit_immediately() {
        let (backend, posts) = posts();

        posts
            .set(&Post { id: Some("p1".into()), title: "a".into() })
            .await
            .unwrap();
        posts.delete("p1").await.unwrap();

        assert_eq!(backend.commits(), 2);
        assert_eq!(
            backend.committed(),
            vec![
                Write::Set {
                    collection: "posts".into(),
                    id: "p1".into(),
                    data: doc! { "title": "a" },
                },
                Write::Delete { collection: "posts".into(), id: "p1".into() },
            ]
        );
    }

    #[tokio::test]
    async fn update_strips_the_id_and_keeps_directives() {
        let (backend, posts) = posts();

        let id = posts
            .update(&doc! { "id": "p1", "stats.views": FieldValue::increment(1) })
            .await
            .unwrap();

        assert_eq!(id, "p1");
        assert_eq!(
            backend.committed(),
            vec![Write::Update {
                collection: "posts".into(),
                id: "p1".into(),
                fields: doc! { "stats.views": FieldValue::increment(1) },
            }]
        );
    }

    #[tokio::test]
    async fn add_under_a_batch_generates_the_identity_first() {
        let (backend, posts) = posts();
        let handle = &posts;

        let mut ids = Vec::new();
        let ids_ref = &mut ids;
        posts
            .context()
            .run_batch(move |_| async move {
                ids_ref.push(handle.add(&Post { id: None, title: "a".into() }).await?);
                ids_ref.push(handle.add(&Post { id: None, title: "b".into() }).await?);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(ids, vec!["gen-0", "gen-1"]);
        assert_eq!(backend.commits(), 1);
        assert_eq!(
            backend
                .committed()
                .iter()
                .map(|write| write.id().to_owned())
                .collect::<Vec<_>>(),
            ids
        );
    }

    #[tokio::test]
    async fn bulk_delete_is_one_batch_in_call_order() {
        let (backend, posts) = posts();

        let results = posts
            .bulk_delete(&["c", "a", "b"])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(backend.scopes_opened(), 1);
        assert_eq!(backend.commits(), 1);
        assert_eq!(
            backend
                .committed()
                .iter()
                .map(|write| write.id().to_owned())
                .collect::<Vec<_>>(),
            vec!["c", "a", "b"]
        );
    }

    #[tokio::test]
    async fn bulk_operations_refuse_to_nest() {
        let (backend, posts) = posts();
        let handle = &posts;

        let outcome = posts
            .context()
            .run_transaction(move |_| async move { handle.bulk_delete(&["a"]).await })
            .await;

        assert!(matches!(outcome, Err(DocumentStoreError::Concurrency(_))));
        assert_eq!(backend.scopes_opened(), 1);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn queries_share_the_collection_target() {
        let (backend, posts) = posts();

        posts
            .order_by("title", SortDirection::Desc)
            .limit(2)
            .fetch()
            .await
            .unwrap();

        let (target, query) = backend.queries().remove(0);
        assert_eq!(target, QueryTarget::Collection("posts".into()));
        assert_eq!(query.limit, Some(2));
        assert_eq!(query.order_by[0].field, "title");
    }

    #[test]
    fn factory_binds_paths() {
        let backend = Arc::new(RecordingBackend::default());
        let context = Arc::new(Context::new(backend));
        let factory = CollectionFactory::<Post>::new(context, Arc::new(Converter::new()));

        assert_eq!(factory.create("users/u1/posts").path(), "users/u1/posts");
        assert_eq!(factory.create("users/u2/posts").path(), "users/u2/posts");
    }
}
