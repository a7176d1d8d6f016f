//! Read results returned by a store: single documents, query results and change sets.

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::lookup_path;

/// A point-in-time read of one document.
///
/// A snapshot of a document that does not exist has no data; [`exists`](Self::exists)
/// returns `false` and the timestamps are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    collection: String,
    id: String,
    data: Option<Document>,
    create_time: Option<DateTime<Utc>>,
    update_time: Option<DateTime<Utc>>,
}

impl DocumentSnapshot {
    /// Creates a snapshot of an existing document.
    pub fn new(collection: impl Into<String>, id: impl Into<String>, data: Document) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            data: Some(data),
            create_time: None,
            update_time: None,
        }
    }

    /// Creates a snapshot for a document that does not exist.
    pub fn missing(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            data: None,
            create_time: None,
            update_time: None,
        }
    }

    /// Sets the store-assigned creation and last-update times.
    pub fn with_times(mut self, create_time: DateTime<Utc>, update_time: DateTime<Utc>) -> Self {
        self.create_time = Some(create_time);
        self.update_time = Some(update_time);
        self
    }

    /// The document's identity within its collection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The path of the collection containing the document.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The full document path, `collection/id`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// The stored fields, without the identity.
    pub fn data(&self) -> Option<&Document> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<Document> {
        self.data
    }

    /// Reads a single field; dotted paths address nested documents.
    pub fn get(&self, field: &str) -> Option<&Bson> {
        lookup_path(self.data.as_ref()?, field)
    }

    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        self.create_time
    }

    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.update_time
    }

    /// JSON view of the stored fields.
    pub fn to_json(&self) -> Option<Value> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::to_value(data).ok())
    }
}

/// Kind of change a [`DocumentChange`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The document entered the result set.
    Added,
    /// The document stayed in the result set but its data changed.
    Modified,
    /// The document left the result set.
    Removed,
}

/// One entry of a query snapshot's change list.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeType,
    /// The document after the change; for removals, the last version seen.
    pub doc: DocumentSnapshot,
    /// The document before a modification.
    pub previous: Option<DocumentSnapshot>,
    /// Position in the previous result set (`None` for additions).
    pub old_index: Option<usize>,
    /// Position in the new result set (`None` for removals).
    pub new_index: Option<usize>,
}

/// The result of running a query: ordered documents plus the changes since the
/// previous snapshot delivered to the same listener.
///
/// One-shot reads carry every document as [`ChangeType::Added`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySnapshot {
    docs: Vec<DocumentSnapshot>,
    changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    /// Creates a snapshot whose change list reports every document as added.
    pub fn new(docs: Vec<DocumentSnapshot>) -> Self {
        let changes = docs
            .iter()
            .enumerate()
            .map(|(index, doc)| DocumentChange {
                kind: ChangeType::Added,
                doc: doc.clone(),
                previous: None,
                old_index: None,
                new_index: Some(index),
            })
            .collect();

        Self { docs, changes }
    }

    /// Creates a snapshot with an explicit change list.
    pub fn with_changes(docs: Vec<DocumentSnapshot>, changes: Vec<DocumentChange>) -> Self {
        Self { docs, changes }
    }

    pub fn docs(&self) -> &[DocumentSnapshot] {
        &self.docs
    }

    pub fn changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentSnapshot> {
        self.docs.iter()
    }

    pub fn into_docs(self) -> Vec<DocumentSnapshot> {
        self.docs
    }
}

/// Outcome of one committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub update_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn missing_snapshots_have_no_data() {
        let snapshot = DocumentSnapshot::missing("users", "u1");

        assert!(!snapshot.exists());
        assert_eq!(snapshot.get("name"), None);
        assert_eq!(snapshot.path(), "users/u1");
        assert_eq!(snapshot.to_json(), None);
    }

    #[test]
    fn field_lookup_and_json() {
        let snapshot = DocumentSnapshot::new("users", "u1", doc! { "name": "ada", "tags": { "admin": true } });

        assert_eq!(snapshot.get("tags.admin"), Some(&Bson::Boolean(true)));
        assert_eq!(snapshot.to_json().unwrap()["name"], "ada");
    }

    #[test]
    fn one_shot_results_report_additions() {
        let snapshot = QuerySnapshot::new(vec![
            DocumentSnapshot::new("users", "a", doc! {}),
            DocumentSnapshot::new("users", "b", doc! {}),
        ]);

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.changes().iter().all(|change| change.kind == ChangeType::Added));
        assert_eq!(snapshot.changes()[1].new_index, Some(1));
    }
}
