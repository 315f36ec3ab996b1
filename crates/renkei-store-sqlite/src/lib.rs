//! SQLite backend for the Renkei clinic store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! pool without blocking the async runtime. The compare-and-swap transitions
//! the core trait requires are expressed as conditional `UPDATE`s; SQLite's
//! single-writer model makes each statement atomic.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
