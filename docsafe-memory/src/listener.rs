//! Live query listeners.
//!
//! Each listener owns an unbounded channel and a delivery task that drains it
//! into the callback, so commits never run user code while holding the store
//! lock. After every commit the listener's query is re-run and, when the result
//! set changed, a snapshot carrying the changes is queued.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use docsafe_core::{
    backend::{ListenerRegistration, QueryTarget, SnapshotCallback},
    error::DocumentStoreResult,
    expr::StructuredQuery,
    snapshot::{ChangeType, DocumentChange, DocumentSnapshot, QuerySnapshot},
};

use crate::{execute::execute, store::StoreMap};

struct Listener {
    target: QueryTarget,
    query: StructuredQuery,
    /// Results delivered most recently.
    last: Vec<DocumentSnapshot>,
    sender: UnboundedSender<QuerySnapshot>,
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Arc<Mutex<HashMap<u64, Listener>>>,
}

impl Listeners {
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Registers a listener and queues its initial snapshot.
    ///
    /// `data` must be the current contents of the store, read under the lock
    /// that commits take.
    pub(crate) fn register(
        &self,
        data: &StoreMap,
        target: QueryTarget,
        query: StructuredQuery,
        callback: SnapshotCallback,
    ) -> DocumentStoreResult<ListenerRegistration> {
        let initial = execute(data, &target, &query)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<QuerySnapshot>();

        tokio::spawn(async move {
            while let Some(snapshot) = receiver.recv().await {
                callback(snapshot);
            }
        });

        // The receiver lives in the task spawned above.
        let _ = sender.send(QuerySnapshot::new(initial.clone()));

        debug!(listener = id, query_target = %target, "listener registered");
        self.entries.lock().insert(
            id,
            Listener {
                target,
                query,
                last: initial,
                sender,
            },
        );

        let entries = Arc::downgrade(&self.entries);
        Ok(ListenerRegistration::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().remove(&id);
                debug!(listener = id, "listener removed");
            }
        }))
    }

    /// Re-runs every listener against `data` and queues the changes.
    pub(crate) fn notify(&self, data: &StoreMap) {
        self.entries.lock().retain(|id, listener| {
            let docs = match execute(data, &listener.target, &listener.query) {
                Ok(docs) => docs,
                Err(error) => {
                    warn!(listener = *id, %error, "listener query failed");
                    return true;
                }
            };

            let changes = diff(&listener.last, &docs);
            if changes.is_empty() {
                return true;
            }

            listener.last = docs.clone();
            let delivered = listener
                .sender
                .send(QuerySnapshot::with_changes(docs, changes))
                .is_ok();

            if !delivered {
                debug!(listener = *id, "delivery task gone, dropping listener");
            }
            delivered
        });
    }
}

/// Changes between two result sets: removals first, in old order, then
/// additions and modifications in new order.
fn diff(old: &[DocumentSnapshot], new: &[DocumentSnapshot]) -> Vec<DocumentChange> {
    let old_positions: HashMap<String, usize> = old
        .iter()
        .enumerate()
        .map(|(index, doc)| (doc.path(), index))
        .collect();
    let new_paths: HashSet<String> = new.iter().map(DocumentSnapshot::path).collect();

    let removed = old
        .iter()
        .enumerate()
        .filter(|(_, doc)| !new_paths.contains(&doc.path()))
        .map(|(index, doc)| DocumentChange {
            kind: ChangeType::Removed,
            doc: doc.clone(),
            previous: None,
            old_index: Some(index),
            new_index: None,
        });

    let current = new
        .iter()
        .enumerate()
        .filter_map(|(index, doc)| match old_positions.get(&doc.path()) {
            None => Some(DocumentChange {
                kind: ChangeType::Added,
                doc: doc.clone(),
                previous: None,
                old_index: None,
                new_index: Some(index),
            }),
            Some(&old_index) if old[old_index].data() != doc.data() => Some(DocumentChange {
                kind: ChangeType::Modified,
                doc: doc.clone(),
                previous: Some(old[old_index].clone()),
                old_index: Some(old_index),
                new_index: Some(index),
            }),
            Some(_) => None,
        });

    removed.chain(current).collect()
}
