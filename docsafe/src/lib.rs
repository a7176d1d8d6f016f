//! Main docsafe crate: a typed, scope-aware data-access layer for document databases.
//!
//! This crate is the primary entry point. It re-exports the core types from the
//! sub-crates, the `Record` derive macro and the in-memory backend.
//!
//! # Features
//!
//! - **Typed collections** - Records are plain Serde structs; a [`Converter`](converter::Converter)
//!   maps them to and from the stored shape
//! - **Ambient scopes** - While a transaction or batch is running, every collection
//!   built from the same store routes its reads and writes through it
//! - **Cursor queries** - `start_at`, `start_after`, `end_at` and `end_before` over values or snapshots
//! - **Field directives** - Server timestamps, increments, field deletes and array operations
//! - **Live listeners** - `on_snapshot` delivers change sets after every commit
//!
//! # Quick Start
//!
//! ```ignore
//! use docsafe::{prelude::*, memory::InMemoryStore};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! pub struct Account {
//!     pub id: String,
//!     pub owner: String,
//!     pub balance: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let accounts = store.collection::<Account>("accounts");
//!
//!     let id = accounts
//!         .add(&Account { id: String::new(), owner: "Alice".into(), balance: 100 })
//!         .await?;
//!
//!     // Reads and writes inside the closure go through the transaction.
//!     store
//!         .run_transaction(|_| async {
//!             if let Some(account) = accounts.fetch(&id).await? {
//!                 accounts.update(&doc! { "id": &id, "balance": account.balance - 10 }).await?;
//!             }
//!             Ok(())
//!         })
//!         .await?;
//!
//!     let rich = accounts
//!         .where_field("balance", FieldOp::Gte, 50)
//!         .order_by("balance", SortDirection::Desc)
//!         .fetch()
//!         .await?;
//!
//!     println!("{rich:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//!
//! Other databases plug in by implementing [`StoreBackend`](backend::StoreBackend),
//! [`StoreTransaction`](backend::StoreTransaction) and [`StoreBatch`](backend::StoreBatch).

#[allow(unused_extern_crates)]
extern crate self as docsafe;

pub mod prelude;

pub use docsafe_core::{
    backend, collection, context, converter, document, error, expr, query, snapshot, store, value,
};
pub use docsafe_macros::Record;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docsafe_memory::{InMemoryStore, InMemoryStoreBuilder, MemoryBatch, MemoryTransaction};
}
