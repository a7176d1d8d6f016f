//! Mapping between application records and stored documents.
//!
//! A [`Converter`] holds an optional encode strategy and an optional decode
//! strategy. When a strategy is absent the structural default is used: encoding
//! serializes the record and drops its `id`, decoding injects the document
//! identity as `id` and deserializes the merged document into the record type.
//!
//! ```ignore
//! use docsafe::converter::Converter;
//!
//! let converter = Converter::<Book, BookDoc>::new()
//!     .with_encode(|book| Ok(BookDoc { book_title: book.title.clone() }))
//!     .with_decode(|doc| Ok(Book { id: doc.id, title: doc.data.book_title }));
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    document::{Identified, Record, RecordExt, deserialize_document, serialize_document},
    error::{DocumentStoreError, DocumentStoreResult},
    snapshot::DocumentSnapshot,
};

type EncodeFn<T, S> = Arc<dyn Fn(&T) -> DocumentStoreResult<S> + Send + Sync>;
type DecodeFn<T, S> = Arc<dyn Fn(Identified<S>) -> DocumentStoreResult<T> + Send + Sync>;

/// Encode/decode strategy pair for records of type `T` stored as `S`.
pub struct Converter<T, S = Document> {
    encode: Option<EncodeFn<T, S>>,
    decode: Option<DecodeFn<T, S>>,
    _marker: PhantomData<fn() -> (T, S)>,
}

impl<T, S> Converter<T, S>
where
    T: Record,
    S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// A converter with no strategies: both directions use the structural default.
    pub fn new() -> Self {
        Self {
            encode: None,
            decode: None,
            _marker: PhantomData,
        }
    }

    /// Sets the record-to-storage strategy. Its result is stored verbatim.
    pub fn with_encode<F>(mut self, encode: F) -> Self
    where
        F: Fn(&T) -> DocumentStoreResult<S> + Send + Sync + 'static,
    {
        self.encode = Some(Arc::new(encode));
        self
    }

    /// Sets the storage-to-record strategy.
    pub fn with_decode<F>(mut self, decode: F) -> Self
    where
        F: Fn(Identified<S>) -> DocumentStoreResult<T> + Send + Sync + 'static,
    {
        self.decode = Some(Arc::new(decode));
        self
    }

    /// Converts a record into the document written to the store.
    pub fn encode(&self, record: &T) -> DocumentStoreResult<Document> {
        match &self.encode {
            Some(encode) => serialize_document(&encode(record)?),
            None => {
                let mut document = record.to_document()?;
                document.remove("id");
                Ok(document)
            }
        }
    }

    /// Converts a stored document back into a record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentNotFound`](DocumentStoreError::DocumentNotFound) when the
    /// snapshot has no data.
    pub fn decode(&self, snapshot: &DocumentSnapshot) -> DocumentStoreResult<T> {
        let data = snapshot.data().ok_or_else(|| {
            DocumentStoreError::DocumentNotFound(snapshot.id().to_owned(), snapshot.collection().to_owned())
        })?;

        // Stored fields are laid over the identity, so a stored `id` replaces it.
        let mut merged = Document::new();
        merged.insert("id", Bson::String(snapshot.id().to_owned()));
        for (key, value) in data {
            merged.insert(key.clone(), value.clone());
        }

        match &self.decode {
            Some(decode) => decode(Identified {
                id: snapshot.id().to_owned(),
                data: deserialize_document(merged)?,
            }),
            None => T::from_document(merged),
        }
    }
}

impl<T, S> Default for Converter<T, S>
where
    T: Record,
    S: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Clone for Converter<T, S> {
    fn clone(&self) -> Self {
        Self {
            encode: self.encode.clone(),
            decode: self.decode.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, S> fmt::Debug for Converter<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("custom_encode", &self.encode.is_some())
            .field("custom_decode", &self.decode.is_some())
            .finish()
    }
}
