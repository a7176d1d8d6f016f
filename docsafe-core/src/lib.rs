//! A typed, scope-aware data-access layer for document databases.
//!
//! This crate is the core of the docsafe project and provides:
//!
//! - **Records** ([`document`]) - The `Record` trait and document (de)serialization helpers
//! - **Converters** ([`converter`]) - Mapping between records and their stored shape
//! - **Scopes** ([`context`]) - The shared transaction/batch slot behind every handle
//! - **Collections** ([`collection`]) - Typed CRUD that routes through the active scope
//! - **Queries** ([`query`], [`expr`]) - Filters, sorting, cursors and live listeners
//! - **Store backend abstraction** ([`backend`]) - Traits implemented by storage backends
//! - **Field directives** ([`value`]) - Write-time values resolved by the store
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docsafe::document::{Record, RecordId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! impl Record for User {
//!     fn id(&self) -> Option<&str> {
//!         self.id.as_record_id()
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsafe_core;

pub mod backend;
pub mod collection;
pub mod context;
pub mod converter;
pub mod document;
pub mod error;
pub mod expr;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod value;

#[cfg(test)]
mod testing;
