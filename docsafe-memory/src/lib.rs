//! In-memory document storage backend for docsafe.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `StoreBackend` trait with the behaviour of a real document database:
//! optimistic transactions, atomic batches, field directives, cursor queries,
//! collection groups and live listeners. It is meant for development and tests.
//!
//! # Quick Start
//!
//! ```ignore
//! use docsafe::{prelude::*, memory::InMemoryStore};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! pub struct User {
//!     pub id: String,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let users = store.collection::<User>("users");
//!
//!     let id = users.add(&User { id: String::new(), name: "Alice".into() }).await?;
//!     let alice = users.fetch(&id).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsafe_memory;

mod apply;
mod evaluator;
mod execute;
mod listener;

pub mod store;
pub mod transaction;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
pub use transaction::{MemoryBatch, MemoryTransaction};
