//! Core traits and types for record representation and serialization.
//!
//! Application code works with records: typed values that carry a string identity.
//! The identity is never stored inside the document body; it is the document's
//! address in its collection.

use bson::{
    Bson, Document,
    de::deserialize_from_bson,
    ser::serialize_to_bson,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Core trait that all records handled by a collection must implement.
///
/// A record always has an `id` field, but the field may be empty (or `None`) when
/// the record has not been stored yet. The default encoder removes the `id` key
/// from the serialized form, so the identity field must serialize as `id`.
///
/// # Deriving
///
/// `#[derive(Record)]` from the `docsafe` crate implements this trait for any
/// struct with an `id: String` or `id: Option<String>` field.
///
/// # Example
///
/// ```ignore
/// use docsafe::document::Record;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     pub id: String,
///     pub name: String,
/// }
///
/// impl Record for User {
///     fn id(&self) -> Option<&str> {
///         (!self.id.is_empty()).then_some(self.id.as_str())
///     }
/// }
/// ```
pub trait Record: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// Returns the record's identity, or `None` when it has none yet.
    fn id(&self) -> Option<&str>;
}

/// Field types that can act as a record identity.
///
/// Empty strings are treated as a missing identity.
pub trait RecordId {
    fn as_record_id(&self) -> Option<&str>;
}

impl RecordId for String {
    fn as_record_id(&self) -> Option<&str> {
        (!self.is_empty()).then_some(self.as_str())
    }
}

impl RecordId for Option<String> {
    fn as_record_id(&self) -> Option<&str> {
        self.as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Raw documents are records whose identity is their `id` key.
impl Record for Document {
    fn id(&self) -> Option<&str> {
        self.get_str("id")
            .ok()
            .filter(|id| !id.is_empty())
    }
}

/// Extension trait providing serialization/deserialization utilities for records.
///
/// This trait is automatically implemented for all types that implement [`Record`].
pub trait RecordExt: Record + Sized {
    /// Converts this record to a BSON document, `id` included.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the record does not serialize to a map.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    /// Creates a record from a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    /// Converts this record to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a record from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        serialize_document(self)
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        deserialize_document(document)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// A storage-shape value paired with the identity of the document it was read from.
///
/// Custom decoders receive this instead of a bare document so the identity is
/// available without being part of the storage shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Identified<S> {
    pub id: String,
    pub data: S,
}

/// Serializes any value into a BSON document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if the value does not serialize
/// to a map, or a serialization error if serialization itself fails.
pub fn serialize_document<T: Serialize + ?Sized>(value: &T) -> DocumentStoreResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected a map, found {:?}",
            other.element_type()
        ))),
    }
}

/// Deserializes a BSON document into any owned value.
pub fn deserialize_document<T: for<'de> Deserialize<'de>>(document: Document) -> DocumentStoreResult<T> {
    Ok(deserialize_from_bson(Bson::Document(document))?)
}

/// Resolves a dotted field path (`address.city`) inside a document.
pub fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current
            .as_document()?
            .get(segment)?;
    }

    Some(current)
}
