//! Tenant identifiers.
//!
//! Every row in the registry belongs to exactly one tenant. The all-zero UUID
//! is reserved for the global baseline that tenant-scoped reads fall back to.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
  /// The reserved global tenant.
  pub const GLOBAL: Self = Self(Uuid::nil());

  pub const fn new(id: Uuid) -> Self { Self(id) }

  pub fn is_global(&self) -> bool { self.0.is_nil() }

  pub fn as_uuid(&self) -> Uuid { self.0 }
}

impl From<Uuid> for TenantId {
  fn from(id: Uuid) -> Self { Self(id) }
}

impl fmt::Display for TenantId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0.hyphenated(), f)
  }
}

impl FromStr for TenantId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s).map(Self)
  }
}
