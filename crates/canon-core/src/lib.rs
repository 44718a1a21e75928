//! Domain types and the registry trait for Canon, a multi-tenant dictionary
//! registry.
//!
//! Nothing here touches storage: validation, the window projection, list
//! rules, tenant fallback and the baseline diff are pure functions that the
//! backends call inside their own transactions.

pub mod dict;
pub mod error;
pub mod event;
pub mod fallback;
pub mod projection;
pub mod query;
pub mod registry;
pub mod release;
pub mod tenant;

pub use error::{Error, ErrorKind, Result};
