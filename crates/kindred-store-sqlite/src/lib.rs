//! SQLite backend for the Kindred match store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Multi-step mutations run inside
//! `BEGIN IMMEDIATE` transactions, which is what makes job claiming and match
//! application safe across concurrent workers sharing one database file.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
