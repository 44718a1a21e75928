//! Tenant → global fallback.
//!
//! Every read path resolves its scope through [`resolve`]: run the query for
//! the requested tenant, and only if that produced an empty result (not an
//! error) and the tenant is not already global, run it again for
//! [`TenantId::GLOBAL`].

use std::collections::BTreeMap;

use crate::tenant::TenantId;

/// Query results that can be "empty" for fallback purposes.
pub trait Emptiness {
  fn is_empty_result(&self) -> bool;
}

impl<T> Emptiness for Vec<T> {
  fn is_empty_result(&self) -> bool { self.is_empty() }
}

impl<T> Emptiness for Option<T> {
  fn is_empty_result(&self) -> bool { self.is_none() }
}

impl<K, V> Emptiness for BTreeMap<K, V> {
  fn is_empty_result(&self) -> bool { self.is_empty() }
}

/// A query result together with the tenant scope that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
  pub scope: TenantId,
  pub value: T,
}

impl<T> Resolved<T> {
  pub fn fell_back(&self, requested: TenantId) -> bool { self.scope != requested }

  pub fn into_inner(self) -> T { self.value }
}

/// Resolve the scope, then query. Errors propagate immediately.
pub fn resolve<T, E, F>(tenant: TenantId, mut query: F) -> Result<Resolved<T>, E>
where
  T: Emptiness,
  F: FnMut(TenantId) -> Result<T, E>,
{
  let local = query(tenant)?;
  if tenant.is_global() || !local.is_empty_result() {
    return Ok(Resolved { scope: tenant, value: local });
  }
  let global = query(TenantId::GLOBAL)?;
  Ok(Resolved {
    scope: TenantId::GLOBAL,
    value: global,
  })
}
