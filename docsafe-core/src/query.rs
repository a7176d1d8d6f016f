//! Typed query builder.
//!
//! A [`Query`] accumulates clauses into a [`StructuredQuery`] and decodes the
//! results with the converter of the collection it came from. Each clause method
//! consumes the builder and returns it, so queries are built by chaining:
//!
//! ```ignore
//! use docsafe::prelude::*;
//!
//! let page = posts
//!     .order_by("title", SortDirection::Asc)
//!     .start_after(["b"])?
//!     .end_at(["d"])?
//!     .fetch()
//!     .await?;
//! ```
//!
//! Cursor semantics follow the sort order: `start_at`/`end_at` include documents
//! at the cursor, `start_after`/`end_before` exclude them, and a start cursor
//! combined with an end cursor selects the range between the two.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::trace;

use crate::{
    backend::{ListenerRegistration, QueryTarget, SnapshotCallback},
    context::Context,
    converter::Converter,
    document::Record,
    error::{DocumentStoreError, DocumentStoreResult},
    expr::{Bound, CursorPosition, Expr, FieldOp, SortDirection, StructuredQuery},
    snapshot::{DocumentSnapshot, QuerySnapshot},
};

/// A query over a collection or collection group, decoding into `T`.
pub struct Query<T, S = Document> {
    context: Arc<Context>,
    converter: Arc<Converter<T, S>>,
    target: QueryTarget,
    query: StructuredQuery,
}

impl<T, S> Query<T, S>
where
    T: Record,
    S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    pub(crate) fn new(
        context: Arc<Context>,
        converter: Arc<Converter<T, S>>,
        target: QueryTarget,
        query: StructuredQuery,
    ) -> Self {
        Self {
            context,
            converter,
            target,
            query,
        }
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    /// The accumulated store-level query.
    pub fn structured(&self) -> &StructuredQuery {
        &self.query
    }

    /// Adds a filter. Multiple filters must all match.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.query = self.query.and_filter(expr);
        self
    }

    /// Adds a single field comparison.
    pub fn where_field(self, field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        self.filter(Expr::field(field.into(), op, value.into()))
    }

    /// Adds a sort clause after any existing ones.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query = self.query.order_by(field, direction);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    /// Starts the results at the cursor, inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`Usage`](DocumentStoreError::Usage) if values are given without a
    /// matching `order_by` clause for each, or if the snapshot is of a missing document.
    pub fn start_at(self, position: impl Into<CursorPosition>) -> DocumentStoreResult<Self> {
        self.start(position.into(), true)
    }

    /// Starts the results after the cursor.
    pub fn start_after(self, position: impl Into<CursorPosition>) -> DocumentStoreResult<Self> {
        self.start(position.into(), false)
    }

    /// Ends the results at the cursor, inclusive.
    pub fn end_at(self, position: impl Into<CursorPosition>) -> DocumentStoreResult<Self> {
        self.end(position.into(), true)
    }

    /// Ends the results before the cursor.
    pub fn end_before(self, position: impl Into<CursorPosition>) -> DocumentStoreResult<Self> {
        self.end(position.into(), false)
    }

    /// Runs the query once and returns the raw snapshot.
    ///
    /// Runs through the active transaction if there is one.
    pub async fn fetch_snapshot(&self) -> DocumentStoreResult<QuerySnapshot> {
        match self.context.transaction() {
            Some(transaction) => {
                trace!(query_target = %self.target, "query via transaction");
                transaction
                    .run_query(&self.target, &self.query)
                    .await
            }
            None => {
                self.context
                    .backend()
                    .run_query(&self.target, &self.query)
                    .await
            }
        }
    }

    /// Runs the query once and decodes the results in sort order.
    pub async fn fetch(&self) -> DocumentStoreResult<Vec<T>> {
        self.fetch_snapshot()
            .await?
            .iter()
            .map(|snapshot| self.converter.decode(snapshot))
            .collect()
    }

    /// Subscribes to the query's results.
    ///
    /// `callback` receives each snapshot, starting with the current results, and a
    /// decode function bound to this query's converter. Callbacks run on the
    /// store's notification task, not on the caller's.
    pub async fn on_snapshot<F>(&self, callback: F) -> DocumentStoreResult<ListenerRegistration>
    where
        F: Fn(&QuerySnapshot, &dyn Fn(&DocumentSnapshot) -> DocumentStoreResult<T>) + Send + Sync + 'static,
    {
        let converter = self.converter.clone();
        let callback: SnapshotCallback = Box::new(move |snapshot: QuerySnapshot| {
            let decode = |document: &DocumentSnapshot| converter.decode(document);
            callback(&snapshot, &decode);
        });

        self.context
            .backend()
            .listen(self.target.clone(), self.query.clone(), callback)
            .await
    }

    fn start(mut self, position: CursorPosition, inclusive: bool) -> DocumentStoreResult<Self> {
        self.check_cursor(&position)?;
        self.query = self.query.start(Bound { position, inclusive });
        Ok(self)
    }

    fn end(mut self, position: CursorPosition, inclusive: bool) -> DocumentStoreResult<Self> {
        self.check_cursor(&position)?;
        self.query = self.query.end(Bound { position, inclusive });
        Ok(self)
    }

    fn check_cursor(&self, position: &CursorPosition) -> DocumentStoreResult<()> {
        match position {
            CursorPosition::Values(values) if values.is_empty() => {
                Err(DocumentStoreError::Usage("cursor requires at least one value".into()))
            }
            CursorPosition::Values(_) if self.query.order_by.is_empty() => Err(DocumentStoreError::Usage(
                "cursor values require an order_by clause".into(),
            )),
            CursorPosition::Values(values) if values.len() > self.query.order_by.len() => {
                Err(DocumentStoreError::Usage(format!(
                    "{} cursor values given for {} order_by clauses",
                    values.len(),
                    self.query.order_by.len()
                )))
            }
            CursorPosition::Snapshot(snapshot) if !snapshot.exists() => Err(DocumentStoreError::Usage(
                format!("cursor document {} does not exist", snapshot.path()),
            )),
            _ => Ok(()),
        }
    }
}

impl<T, S> Clone for Query<T, S> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            converter: self.converter.clone(),
            target: self.target.clone(),
            query: self.query.clone(),
        }
    }
}

impl<T, S> fmt::Debug for Query<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("target", &self.target)
            .field("query", &self.query)
            .finish()
    }
}
