//! Temporal reads over the snapshot tables. Each read resolves its scope
//! through the shared tenant → global fallback.

use canon_core::{
  Error as CoreError,
  dict::{DictDefinition, DictValueSegment},
  fallback,
  projection,
  query::{ListQuery, applicable_on},
  registry::RebuildSummary,
};
use chrono::NaiveDate;
use tracing::debug;

use crate::{
  Result,
  tx::{Stored, TenantTx},
};

pub fn list_dicts(tx: &mut TenantTx<'_>, query: &ListQuery) -> Result<Vec<DictDefinition>> {
  let requested = tx.tenant();
  let resolved = fallback::resolve(requested, |scope| {
    tx.scoped(scope, |tx| Ok(query.matching(tx.dict_rows(None)?)))
  })?;
  if resolved.fell_back(requested) {
    debug!(tenant = %requested, "dictionaries served from global baseline");
  }
  Ok(query.page(resolved.into_inner()))
}

pub fn list_values(
  tx: &mut TenantTx<'_>,
  dict_code: &str,
  query: &ListQuery,
) -> Result<Vec<DictValueSegment>> {
  let dict_code = dict_code.trim();
  if dict_code.is_empty() {
    return Err(CoreError::validation("dict_code is required").into());
  }
  let requested = tx.tenant();
  let resolved = fallback::resolve(requested, |scope| {
    tx.scoped(scope, |tx| Ok(query.matching(tx.value_rows(Some(dict_code), None)?)))
  })?;
  if resolved.fell_back(requested) {
    debug!(tenant = %requested, dict_code, "values served from global baseline");
  }
  Ok(query.page(resolved.into_inner()))
}

pub fn resolve_label(
  tx: &mut TenantTx<'_>,
  as_of: NaiveDate,
  dict_code: &str,
  code: &str,
) -> Result<Option<String>> {
  let resolved = fallback::resolve(tx.tenant(), |scope| {
    tx.scoped(scope, |tx| {
      let rows = tx.value_rows(Some(dict_code), Some(code))?;
      Ok(applicable_on(&rows, as_of).map(|row| row.label.clone()))
    })
  })?;
  Ok(resolved.into_inner())
}

/// Replace the active tenant's snapshot rows with ones re-derived from its
/// events. Runs in the caller's transaction.
pub fn rebuild(tx: &mut TenantTx<'_>) -> Result<RebuildSummary> {
  let tenant = tx.tenant();
  let events = tx.events(None, 0, None, None)?;
  let dicts = projection::rebuild_dicts(tenant, &events)?;
  let values = projection::rebuild_values(tenant, &events)?;

  tx.clear_snapshots()?;
  for (row, last_event_id) in &dicts {
    row.save_opened(tx, *last_event_id)?;
  }
  for (row, last_event_id) in &values {
    row.save_opened(tx, *last_event_id)?;
  }

  debug!(%tenant, events = events.len(), "projection rebuilt");
  Ok(RebuildSummary {
    events:     events.len(),
    dict_rows:  dicts.len(),
    value_rows: values.len(),
  })
}
