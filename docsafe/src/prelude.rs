//! Convenient re-exports of commonly used types from docsafe.
//!
//! ```ignore
//! use docsafe::prelude::*;
//! ```
//!
//! Brings in the store and collection handles, the query vocabulary, field
//! directives, the error types, the `Record` derive and the Serde derives.

pub use docsafe_core::{
    backend::{ListenerGuard, ListenerRegistration, StoreBackend, StoreBackendBuilder},
    collection::{Collection, CollectionFactory},
    converter::Converter,
    document::{Identified, Record, RecordExt},
    error::{DocumentStoreError, DocumentStoreResult},
    expr::{Expr, FieldOp, Filter, Sort, SortDirection},
    query::Query,
    snapshot::{ChangeType, DocumentChange, DocumentSnapshot, QuerySnapshot, WriteResult},
    store::{DocumentCollection, DocumentStore},
    value::{FieldValue, Storable},
};
pub use docsafe_macros::Record;

pub use bson::doc;
pub use serde::{Deserialize, Serialize};
