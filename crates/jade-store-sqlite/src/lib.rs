//! SQLite backend for the Jade operational store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Also provides [`SqliteSource`], a
//! read-only adapter over a SQLite export of the hospital system.

mod encode;
mod schema;
mod source;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use source::SqliteSource;
pub use store::SqliteStore;
