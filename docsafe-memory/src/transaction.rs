//! Transaction and batch handles for the in-memory store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{fmt, mem};
use tracing::debug;

use docsafe_core::{
    backend::{QueryTarget, StoreBatch, StoreTransaction, Write},
    error::{DocumentStoreError, DocumentStoreResult},
    expr::StructuredQuery,
    snapshot::{DocumentSnapshot, QuerySnapshot, WriteResult},
};

use crate::store::{InMemoryStore, ReadSet};

#[derive(Default)]
struct TransactionState {
    reads: ReadSet,
    writes: Vec<Write>,
    closed: bool,
}

impl TransactionState {
    fn check_open(&self) -> DocumentStoreResult<()> {
        if self.closed {
            return Err(DocumentStoreError::Closed(
                "transaction has already been committed or rolled back".into(),
            ));
        }
        Ok(())
    }

    fn check_readable(&self) -> DocumentStoreResult<()> {
        self.check_open()?;
        if !self.writes.is_empty() {
            return Err(DocumentStoreError::ReadAfterWrite(
                "transactions require all reads to be executed before all writes".into(),
            ));
        }
        Ok(())
    }
}

/// An optimistic transaction.
///
/// Reads go straight to the store and record the version they saw. Writes are
/// buffered until [`commit`](StoreTransaction::commit), which applies them only
/// if none of the recorded versions has changed.
pub struct MemoryTransaction {
    store: InMemoryStore,
    state: Mutex<TransactionState>,
}

impl MemoryTransaction {
    pub(crate) fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            state: Mutex::new(TransactionState::default()),
        }
    }
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryTransaction")
            .field("reads", &state.reads.len())
            .field("writes", &state.writes.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot> {
        self.state.lock().check_readable()?;

        let (snapshot, version) = self.store.read_document(collection, id).await;
        self.state
            .lock()
            .reads
            .entry((collection.to_owned(), id.to_owned()))
            .or_insert(version);

        Ok(snapshot)
    }

    async fn run_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot> {
        self.state.lock().check_readable()?;

        let (docs, versions) = self.store.read_query(target, query).await?;
        let mut state = self.state.lock();
        for (address, version) in versions {
            state.reads.entry(address).or_insert(Some(version));
        }

        Ok(QuerySnapshot::new(docs))
    }

    fn enqueue(&self, write: Write) -> DocumentStoreResult<()> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.writes.push(write);
        Ok(())
    }

    async fn commit(&self) -> DocumentStoreResult<Vec<WriteResult>> {
        let (writes, reads) = {
            let mut state = self.state.lock();
            state.check_open()?;
            state.closed = true;
            (mem::take(&mut state.writes), mem::take(&mut state.reads))
        };

        debug!(writes = writes.len(), reads = reads.len(), "committing transaction");
        self.store.apply(writes, Some(&reads)).await
    }

    async fn rollback(&self) -> DocumentStoreResult<()> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.closed = true;
        state.writes.clear();
        state.reads.clear();
        Ok(())
    }
}

/// A write-only buffer applied in one commit.
pub struct MemoryBatch {
    store: InMemoryStore,
    writes: Mutex<Option<Vec<Write>>>,
}

impl MemoryBatch {
    pub(crate) fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            writes: Mutex::new(Some(Vec::new())),
        }
    }
}

impl fmt::Debug for MemoryBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBatch")
            .field("writes", &self.writes.lock().as_ref().map(Vec::len))
            .finish()
    }
}

fn batch_closed() -> DocumentStoreError {
    DocumentStoreError::Closed("batch has already been committed".into())
}

#[async_trait]
impl StoreBatch for MemoryBatch {
    fn enqueue(&self, write: Write) -> DocumentStoreResult<()> {
        self.writes
            .lock()
            .as_mut()
            .ok_or_else(batch_closed)?
            .push(write);
        Ok(())
    }

    async fn commit(&self) -> DocumentStoreResult<Vec<WriteResult>> {
        let writes = self.writes.lock().take().ok_or_else(batch_closed)?;

        debug!(writes = writes.len(), "committing batch");
        self.store.apply(writes, None).await
    }
}
