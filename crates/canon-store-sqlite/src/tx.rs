//! [`TenantTx`], a transaction bound to an active tenant context.
//!
//! The only way to obtain a `TenantTx` is to activate one with a tenant, so no
//! statement can run before the context is set. Every helper reads the active
//! tenant from the context instead of taking it as an argument; moving to
//! another tenant is an explicit [`TenantTx::switch_tenant`] or a bounded
//! [`TenantTx::scoped`] call.

use canon_core::{
  dict::{DictDefinition, DictKey, DictValueSegment, Segment, ValueKey},
  event::{DictEvent, EventFamily, Mutation, MutationKey},
  release::PublishResult,
  tenant::TenantId,
};
use chrono::{NaiveDate, Utc};
use rusqlite::{OptionalExtension as _, Transaction, params};
use tracing::debug;

use crate::{
  Result,
  encode::{
    EVENT_COLUMNS, RawDict, RawEvent, RawRelease, RawValue, encode_day, encode_dt, encode_tenant,
    encode_uuid,
  },
};

pub struct TenantTx<'c> {
  tx:     Transaction<'c>,
  tenant: TenantId,
}

impl<'c> TenantTx<'c> {
  pub fn activate(tx: Transaction<'c>, tenant: TenantId) -> Self {
    debug!(%tenant, "tenant context activated");
    Self { tx, tenant }
  }

  pub fn tenant(&self) -> TenantId { self.tenant }

  pub fn switch_tenant(&mut self, tenant: TenantId) {
    debug!(from = %self.tenant, to = %tenant, "tenant context switched");
    self.tenant = tenant;
  }

  /// Run `f` with `scope` active, then restore the previous context.
  pub fn scoped<T>(&mut self, scope: TenantId, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
    let previous = self.tenant;
    self.tenant = scope;
    let out = f(self);
    self.tenant = previous;
    out
  }

  pub fn commit(self) -> Result<()> {
    self.tx.commit()?;
    Ok(())
  }

  // ── Event log ─────────────────────────────────────────────────────────

  pub fn find_event(&self, family: EventFamily, request_code: &str) -> Result<Option<DictEvent>> {
    let raw = self
      .tx
      .query_row(
        &format!(
          "SELECT {EVENT_COLUMNS} FROM events
           WHERE tenant_id = ?1 AND family = ?2 AND request_code = ?3"
        ),
        params![encode_tenant(self.tenant), family.as_str(), request_code],
        RawEvent::from_row,
      )
      .optional()?;
    raw.map(RawEvent::into_event).transpose()
  }

  /// Append an event. Returns `None` when the request code is already taken
  /// for this tenant and family.
  pub fn insert_event<K: MutationKey>(
    &self,
    family: EventFamily,
    m: &Mutation<K>,
    before: &serde_json::Value,
    after: &serde_json::Value,
  ) -> Result<Option<i64>> {
    let inserted = self.tx.execute(
      "INSERT INTO events (
         tenant_id, family, dict_code, code, event_type, effective_day,
         request_code, initiator_uuid, tx_time, payload, before_snapshot, after_snapshot
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
       ON CONFLICT (tenant_id, family, request_code) DO NOTHING",
      params![
        encode_tenant(self.tenant),
        family.as_str(),
        m.key.dict_code(),
        m.key.code(),
        m.event_type.as_str(),
        encode_day(m.effective_day),
        m.request_code,
        encode_uuid(m.initiator),
        encode_dt(Utc::now()),
        m.payload.to_string(),
        before.to_string(),
        after.to_string(),
      ],
    )?;
    Ok((inserted == 1).then(|| self.tx.last_insert_rowid()))
  }

  /// Events with `id > after_id`, in id order, optionally restricted to one
  /// family and to events effective on or before `up_to`.
  pub fn events(
    &self,
    family: Option<EventFamily>,
    after_id: i64,
    up_to: Option<NaiveDate>,
    limit: Option<usize>,
  ) -> Result<Vec<DictEvent>> {
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let mut stmt = self.tx.prepare(&format!(
      "SELECT {EVENT_COLUMNS} FROM events
       WHERE tenant_id = ?1
         AND id > ?2
         AND (?3 IS NULL OR family = ?3)
         AND (?4 IS NULL OR effective_day <= ?4)
       ORDER BY id ASC
       LIMIT ?5"
    ))?;
    let raws = stmt
      .query_map(
        params![
          encode_tenant(self.tenant),
          after_id,
          family.map(|f| f.as_str()),
          up_to.map(encode_day),
          limit,
        ],
        RawEvent::from_row,
      )?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawEvent::into_event).collect()
  }

  // ── Snapshot rows ─────────────────────────────────────────────────────

  pub fn dict_rows(&self, dict_code: Option<&str>) -> Result<Vec<DictDefinition>> {
    let mut stmt = self.tx.prepare(
      "SELECT tenant_id, dict_code, name, enabled_on, disabled_on
       FROM dict_segments
       WHERE tenant_id = ?1 AND (?2 IS NULL OR dict_code = ?2)
       ORDER BY dict_code ASC, enabled_on ASC",
    )?;
    let raws = stmt
      .query_map(params![encode_tenant(self.tenant), dict_code], RawDict::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawDict::into_definition).collect()
  }

  pub fn value_rows(&self, dict_code: Option<&str>, code: Option<&str>) -> Result<Vec<DictValueSegment>> {
    let mut stmt = self.tx.prepare(
      "SELECT tenant_id, dict_code, code, label, enabled_on, disabled_on
       FROM value_segments
       WHERE tenant_id = ?1
         AND (?2 IS NULL OR dict_code = ?2)
         AND (?3 IS NULL OR code = ?3)
       ORDER BY dict_code ASC, code ASC, enabled_on ASC",
    )?;
    let raws = stmt
      .query_map(params![encode_tenant(self.tenant), dict_code, code], RawValue::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawValue::into_segment).collect()
  }

  /// Remove every snapshot row of the active tenant.
  pub fn clear_snapshots(&self) -> Result<()> {
    let tenant = encode_tenant(self.tenant);
    self.tx.execute("DELETE FROM dict_segments WHERE tenant_id = ?1", params![tenant])?;
    self.tx.execute("DELETE FROM value_segments WHERE tenant_id = ?1", params![tenant])?;
    Ok(())
  }

  // ── Releases ──────────────────────────────────────────────────────────

  /// Insert or replace the release record. Written under the target tenant.
  ///
  /// A succeeded record is only ever replaced by another succeeded one.
  pub fn save_release(&self, r: &PublishResult) -> Result<()> {
    self.tx.execute(
      "INSERT INTO releases (
         target_tenant_id, release_id, source_tenant_id, as_of, request_code, operator,
         status, dict_events_total, dict_events_applied, dict_events_retried,
         value_events_total, value_events_applied, value_events_retried,
         started_at, finished_at, error
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
       ON CONFLICT (target_tenant_id, release_id) DO UPDATE SET
         source_tenant_id     = excluded.source_tenant_id,
         as_of                = excluded.as_of,
         request_code         = excluded.request_code,
         operator             = excluded.operator,
         status               = excluded.status,
         dict_events_total    = excluded.dict_events_total,
         dict_events_applied  = excluded.dict_events_applied,
         dict_events_retried  = excluded.dict_events_retried,
         value_events_total   = excluded.value_events_total,
         value_events_applied = excluded.value_events_applied,
         value_events_retried = excluded.value_events_retried,
         started_at           = excluded.started_at,
         finished_at          = excluded.finished_at,
         error                = excluded.error
       WHERE releases.status <> 'succeeded' OR excluded.status = 'succeeded'",
      params![
        encode_tenant(self.tenant),
        r.release_id,
        encode_tenant(r.source_tenant),
        encode_day(r.as_of),
        r.request_code,
        encode_uuid(r.operator),
        r.status.to_string(),
        r.dict_events_total as i64,
        r.dict_events_applied as i64,
        r.dict_events_retried as i64,
        r.value_events_total as i64,
        r.value_events_applied as i64,
        r.value_events_retried as i64,
        encode_dt(r.started_at),
        r.finished_at.map(encode_dt),
        r.error,
      ],
    )?;
    Ok(())
  }

  pub fn release(&self, release_id: &str) -> Result<Option<PublishResult>> {
    let raw = self
      .tx
      .query_row(
        "SELECT target_tenant_id, release_id, source_tenant_id, as_of, request_code, operator,
                status, dict_events_total, dict_events_applied, dict_events_retried,
                value_events_total, value_events_applied, value_events_retried,
                started_at, finished_at, error
         FROM releases
         WHERE target_tenant_id = ?1 AND release_id = ?2",
        params![encode_tenant(self.tenant), release_id],
        RawRelease::from_row,
      )
      .optional()?;
    raw.map(RawRelease::into_result).transpose()
  }
}

// ─── Per-family snapshot persistence ─────────────────────────────────────────

/// How a snapshot family is loaded and written. Lets the gateway and the
/// rebuild stay generic over dictionaries and values.
pub trait Stored: Segment {
  /// All windows of one key for the active tenant, oldest first.
  fn load_key(tx: &TenantTx<'_>, key: &Self::Key) -> Result<Vec<Self>>;

  /// Persist the closing of an existing window.
  fn save_closed(&self, tx: &TenantTx<'_>, event_id: i64) -> Result<()>;

  /// Persist a new window.
  fn save_opened(&self, tx: &TenantTx<'_>, event_id: i64) -> Result<()>;
}

impl Stored for DictDefinition {
  fn load_key(tx: &TenantTx<'_>, key: &DictKey) -> Result<Vec<Self>> {
    tx.dict_rows(Some(&key.dict_code))
  }

  fn save_closed(&self, tx: &TenantTx<'_>, event_id: i64) -> Result<()> {
    tx.tx.execute(
      "UPDATE dict_segments SET disabled_on = ?1, last_event_id = ?2
       WHERE tenant_id = ?3 AND dict_code = ?4 AND enabled_on = ?5",
      params![
        self.disabled_on.map(encode_day),
        event_id,
        encode_tenant(tx.tenant),
        self.dict_code,
        encode_day(self.enabled_on),
      ],
    )?;
    Ok(())
  }

  fn save_opened(&self, tx: &TenantTx<'_>, event_id: i64) -> Result<()> {
    tx.tx.execute(
      "INSERT INTO dict_segments (tenant_id, dict_code, name, enabled_on, disabled_on, last_event_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        encode_tenant(tx.tenant),
        self.dict_code,
        self.name,
        encode_day(self.enabled_on),
        self.disabled_on.map(encode_day),
        event_id,
      ],
    )?;
    Ok(())
  }
}

impl Stored for DictValueSegment {
  fn load_key(tx: &TenantTx<'_>, key: &ValueKey) -> Result<Vec<Self>> {
    tx.value_rows(Some(&key.dict_code), Some(&key.code))
  }

  fn save_closed(&self, tx: &TenantTx<'_>, event_id: i64) -> Result<()> {
    tx.tx.execute(
      "UPDATE value_segments SET disabled_on = ?1, last_event_id = ?2
       WHERE tenant_id = ?3 AND dict_code = ?4 AND code = ?5 AND enabled_on = ?6",
      params![
        self.disabled_on.map(encode_day),
        event_id,
        encode_tenant(tx.tenant),
        self.dict_code,
        self.code,
        encode_day(self.enabled_on),
      ],
    )?;
    Ok(())
  }

  fn save_opened(&self, tx: &TenantTx<'_>, event_id: i64) -> Result<()> {
    tx.tx.execute(
      "INSERT INTO value_segments
         (tenant_id, dict_code, code, label, enabled_on, disabled_on, last_event_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        encode_tenant(tx.tenant),
        self.dict_code,
        self.code,
        self.label,
        encode_day(self.enabled_on),
        self.disabled_on.map(encode_day),
        event_id,
      ],
    )?;
    Ok(())
  }
}
