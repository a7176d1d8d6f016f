//! The ambient scope shared by every collection and query of one store handle.
//!
//! A [`Context`] owns a single slot that holds at most one open transaction or
//! batch. Collections consult the slot on every call and route their reads and
//! writes into whatever scope is active at that moment.
//!
//! Opening a scope while another one is active fails with
//! [`Concurrency`](DocumentStoreError::Concurrency) before the store is contacted.
//! The slot is cleared on every exit path, including panics and a dropped future.

use parking_lot::Mutex;
use std::{fmt, future::Future, sync::Arc};
use tracing::{debug, warn};

use crate::{
    backend::{BatchRef, StoreBackend, TransactionRef},
    error::{DocumentStoreError, DocumentStoreResult},
    snapshot::WriteResult,
};

/// The scope currently published on a context.
#[derive(Debug, Clone)]
pub enum Scope {
    Transaction(TransactionRef),
    Batch(BatchRef),
}

#[derive(Debug)]
enum Slot {
    Idle,
    /// Claimed by a `run_*` call whose store handle is still being opened.
    Reserved,
    Active(Scope),
}

/// Shared routing state for one store handle.
pub struct Context {
    backend: Arc<dyn StoreBackend>,
    slot: Mutex<Slot>,
}

impl Context {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            slot: Mutex::new(Slot::Idle),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// The active scope, if a transaction or batch has been published.
    pub fn scope(&self) -> Option<Scope> {
        match &*self.slot.lock() {
            Slot::Active(scope) => Some(scope.clone()),
            Slot::Idle | Slot::Reserved => None,
        }
    }

    /// The active transaction, if any.
    pub fn transaction(&self) -> Option<TransactionRef> {
        match self.scope()? {
            Scope::Transaction(transaction) => Some(transaction),
            Scope::Batch(_) => None,
        }
    }

    /// The active batch, if any.
    pub fn batch(&self) -> Option<BatchRef> {
        match self.scope()? {
            Scope::Batch(batch) => Some(batch),
            Scope::Transaction(_) => None,
        }
    }

    /// Returns `true` while a scope is open or being opened.
    pub fn is_busy(&self) -> bool {
        !matches!(&*self.slot.lock(), Slot::Idle)
    }

    /// Runs `f` inside a new transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it returns
    /// `Err`. The error from `f` is returned unchanged even if the rollback fails.
    /// Commit errors raised by the store are returned unchanged as well.
    ///
    /// # Errors
    ///
    /// Returns [`Concurrency`](DocumentStoreError::Concurrency) if a transaction or
    /// batch is already active on this context.
    pub async fn run_transaction<F, Fut, R>(&self, f: F) -> DocumentStoreResult<R>
    where
        F: FnOnce(TransactionRef) -> Fut,
        Fut: Future<Output = DocumentStoreResult<R>>,
    {
        let guard = self.reserve("transaction")?;

        let transaction = self.backend.begin_transaction().await?;
        guard.publish(Scope::Transaction(transaction.clone()));
        debug!("transaction opened");

        match f(transaction.clone()).await {
            Ok(value) => {
                let results = transaction.commit().await?;
                debug!(writes = results.len(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                match transaction.rollback().await {
                    Ok(()) => debug!(error = %err, "transaction rolled back"),
                    Err(rollback_err) => warn!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "transaction rollback failed"
                    ),
                }
                Err(err)
            }
        }
    }

    /// Runs `f` inside a new batch, then commits the batch.
    ///
    /// `f` only enqueues writes. The returned results follow the order in which the
    /// writes were enqueued. If `f` fails, nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns [`Concurrency`](DocumentStoreError::Concurrency) if a transaction or
    /// batch is already active on this context.
    pub async fn run_batch<F, Fut>(&self, f: F) -> DocumentStoreResult<Vec<WriteResult>>
    where
        F: FnOnce(BatchRef) -> Fut,
        Fut: Future<Output = DocumentStoreResult<()>>,
    {
        let guard = self.reserve("batch")?;

        let batch = self.backend.begin_batch().await?;
        guard.publish(Scope::Batch(batch.clone()));
        debug!("batch opened");

        if let Err(err) = f(batch.clone()).await {
            debug!(error = %err, "batch discarded");
            return Err(err);
        }

        let results = batch.commit().await?;
        debug!(writes = results.len(), "batch committed");

        Ok(results)
    }

    fn reserve(&self, kind: &'static str) -> DocumentStoreResult<ScopeGuard<'_>> {
        let mut slot = self.slot.lock();

        if !matches!(&*slot, Slot::Idle) {
            return Err(DocumentStoreError::Concurrency(format!(
                "cannot start a {kind} while another transaction or batch is active"
            )));
        }

        *slot = Slot::Reserved;
        Ok(ScopeGuard { context: self })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.backend)
            .field("slot", &*self.slot.lock())
            .finish()
    }
}

/// Holds the slot for the duration of one `run_*` call.
struct ScopeGuard<'a> {
    context: &'a Context,
}

impl ScopeGuard<'_> {
    fn publish(&self, scope: Scope) {
        *self.context.slot.lock() = Slot::Active(scope);
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        *self.context.slot.lock() = Slot::Idle;
        debug!("scope released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::Write, testing::RecordingBackend};
    use bson::doc;

    fn context() -> (Arc<RecordingBackend>, Context) {
        let backend = Arc::new(RecordingBackend::default());
        (backend.clone(), Context::new(backend))
    }

    fn set(id: &str) -> Write {
        Write::Set {
            collection: "posts".into(),
            id: id.into(),
            data: doc! { "title": id },
        }
    }

    #[tokio::test]
    async fn transaction_is_visible_only_inside_the_scope() {
        let (_, context) = context();
        assert!(context.transaction().is_none());

        let ctx = &context;
        let seen = context
            .run_transaction(move |_| async move { Ok(ctx.transaction().is_some() && ctx.batch().is_none()) })
            .await
            .unwrap();

        assert!(seen);
        assert!(context.transaction().is_none());
        assert!(!context.is_busy());
    }

    #[tokio::test]
    async fn nested_scopes_fail_before_touching_the_store() {
        let (backend, context) = context();

        let ctx = &context;
        let err = context
            .run_transaction(move |_| async move {
                let nested = ctx.run_batch(|_| async { Ok(()) }).await;
                assert!(matches!(nested, Err(DocumentStoreError::Concurrency(_))));

                let nested = ctx.run_transaction(|_| async { Ok(()) }).await;
                assert!(matches!(nested, Err(DocumentStoreError::Concurrency(_))));

                Ok(())
            })
            .await;

        assert!(err.is_ok());
        assert_eq!(backend.scopes_opened(), 1);
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back_and_clears_the_slot() {
        let (backend, context) = context();

        let result: DocumentStoreResult<()> = context
            .run_transaction(|tx| async move {
                tx.enqueue(set("p1"))?;
                Err(DocumentStoreError::Unknown("boom".into()))
            })
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Unknown(message)) if message == "boom"));
        assert!(context.scope().is_none());
        assert!(backend.committed().is_empty());
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn batch_commits_once_in_enqueue_order() {
        let (backend, context) = context();

        let results = context
            .run_batch(|batch| async move {
                batch.enqueue(set("p1"))?;
                batch.enqueue(set("p2"))?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(backend.commits(), 1);
        assert_eq!(
            backend
                .committed()
                .iter()
                .map(|write| write.id().to_owned())
                .collect::<Vec<_>>(),
            vec!["p1", "p2"]
        );
        assert!(context.batch().is_none());
    }

    #[tokio::test]
    async fn dropped_scope_future_releases_the_slot() {
        let (_, context) = context();

        {
            let pending = context.run_batch(|_| std::future::pending::<DocumentStoreResult<()>>());
            let polled = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
            assert!(polled.is_err());
        }

        assert!(!context.is_busy());
        context
            .run_batch(|_| async { Ok(()) })
            .await
            .unwrap();
    }
}
