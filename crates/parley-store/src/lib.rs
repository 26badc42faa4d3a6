//! # parley-store
//!
//! Durable client-side storage for Parley, backed by SQLite.
//!
//! The only data persisted today is the session's bearer token, kept in a
//! small key/value table. Callers depend on the [`TokenStorage`] trait so the
//! SQLite store can be swapped for the in-memory one in tests.

pub mod database;
pub mod kv;
pub mod migrations;
pub mod tokens;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use tokens::{MemoryTokenStore, SqliteTokenStore, TokenStorage};
