//! A backend that records what it is asked to do. Reads always miss.

use async_trait::async_trait;
use bson::Document;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    backend::{
        BatchRef, ListenerRegistration, QueryTarget, SnapshotCallback, StoreBackend, StoreBatch,
        StoreTransaction, TransactionRef, Write,
    },
    error::DocumentStoreResult,
    expr::StructuredQuery,
    snapshot::{DocumentSnapshot, QuerySnapshot, WriteResult},
};

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    scopes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    ids: AtomicUsize,
    committed: Mutex<Vec<Write>>,
    queries: Mutex<Vec<(QueryTarget, StructuredQuery)>>,
}

impl Counters {
    fn commit(&self, writes: Vec<Write>) -> Vec<WriteResult> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let results = writes
            .iter()
            .map(|_| WriteResult { update_time: Utc::now() })
            .collect();
        self.committed.lock().extend(writes);
        results
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    counters: Arc<Counters>,
}

impl RecordingBackend {
    /// Every store call, scoped handles excluded.
    pub(crate) fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn scopes_opened(&self) -> usize {
        self.counters.scopes.load(Ordering::SeqCst)
    }

    pub(crate) fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    pub(crate) fn committed(&self) -> Vec<Write> {
        self.counters.committed.lock().clone()
    }

    pub(crate) fn queries(&self) -> Vec<(QueryTarget, StructuredQuery)> {
        self.counters.queries.lock().clone()
    }

    fn touch(&self) {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for RecordingBackend {
    fn new_document_id(&self) -> String {
        format!("gen-{}", self.counters.ids.fetch_add(1, Ordering::SeqCst))
    }

    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot> {
        self.touch();
        Ok(DocumentSnapshot::missing(collection, id))
    }

    async fn run_query(
        &self,
        target: &QueryTarget,
        query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot> {
        self.touch();
        self.counters
            .queries
            .lock()
            .push((target.clone(), query.clone()));
        Ok(QuerySnapshot::default())
    }

    async fn add_document(&self, collection: &str, data: Document) -> DocumentStoreResult<String> {
        self.touch();
        let id = self.new_document_id();
        self.counters.commit(vec![Write::Set {
            collection: collection.to_owned(),
            id: id.clone(),
            data,
        }]);
        Ok(id)
    }

    async fn commit(&self, writes: Vec<Write>) -> DocumentStoreResult<Vec<WriteResult>> {
        self.touch();
        Ok(self.counters.commit(writes))
    }

    async fn begin_transaction(&self) -> DocumentStoreResult<TransactionRef> {
        self.touch();
        self.counters.scopes.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingScope {
            counters: self.counters.clone(),
            pending: Mutex::default(),
        }))
    }

    async fn begin_batch(&self) -> DocumentStoreResult<BatchRef> {
        self.touch();
        self.counters.scopes.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingScope {
            counters: self.counters.clone(),
            pending: Mutex::default(),
        }))
    }

    async fn listen(
        &self,
        _target: QueryTarget,
        _query: StructuredQuery,
        _callback: SnapshotCallback,
    ) -> DocumentStoreResult<ListenerRegistration> {
        self.touch();
        Ok(ListenerRegistration::new(|| {}))
    }
}

#[derive(Debug)]
struct RecordingScope {
    counters: Arc<Counters>,
    pending: Mutex<Vec<Write>>,
}

#[async_trait]
impl StoreTransaction for RecordingScope {
    async fn get_document(&self, collection: &str, id: &str) -> DocumentStoreResult<DocumentSnapshot> {
        Ok(DocumentSnapshot::missing(collection, id))
    }

    async fn run_query(
        &self,
        _target: &QueryTarget,
        _query: &StructuredQuery,
    ) -> DocumentStoreResult<QuerySnapshot> {
        Ok(QuerySnapshot::default())
    }

    fn enqueue(&self, write: Write) -> DocumentStoreResult<()> {
        self.pending.lock().push(write);
        Ok(())
    }

    async fn commit(&self) -> DocumentStoreResult<Vec<WriteResult>> {
        let writes = std::mem::take(&mut *self.pending.lock());
        Ok(self.counters.commit(writes))
    }

    async fn rollback(&self) -> DocumentStoreResult<()> {
        self.pending.lock().clear();
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StoreBatch for RecordingScope {
    fn enqueue(&self, write: Write) -> DocumentStoreResult<()> {
        self.pending.lock().push(write);
        Ok(())
    }

    async fn commit(&self) -> DocumentStoreResult<Vec<WriteResult>> {
        let writes = std::mem::take(&mut *self.pending.lock());
        Ok(self.counters.commit(writes))
    }
}
