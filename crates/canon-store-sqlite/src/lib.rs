//! SQLite backend for the Canon dictionary registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every operation runs inside one
//! transaction whose tenant context is held by a tenant-scoped
//! transaction handle.

mod encode;
mod gateway;
mod projector;
mod release;
mod schema;
mod store;
mod tx;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteRegistry;

#[cfg(test)]
mod tests;
