//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Days are stored as `YYYY-MM-DD` so they sort lexically. Timestamps are
//! RFC 3339 strings. UUIDs (tenants, initiators) are hyphenated lowercase
//! strings. Payloads and snapshots are compact JSON.

use canon_core::{
  dict::{DictDefinition, DictValueSegment},
  event::{DictEvent, EventFamily, EventType},
  release::{PublishResult, ReleaseStatus},
  tenant::TenantId,
};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_tenant(t: TenantId) -> String { encode_uuid(t.as_uuid()) }

pub fn decode_tenant(s: &str) -> Result<TenantId> { decode_uuid(s).map(TenantId::new) }

pub fn encode_day(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_day(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::Decode(format!("day {s:?}: {e}")))
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn decode_family(s: &str) -> Result<EventFamily> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown event family: {s:?}")))
}

pub fn decode_event_type(s: &str) -> Result<EventType> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown event type: {s:?}")))
}

fn decode_count(n: i64) -> Result<usize> {
  usize::try_from(n).map_err(|_| Error::Decode(format!("negative counter: {n}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawEvent::from_row`].
pub const EVENT_COLUMNS: &str = "id, tenant_id, family, dict_code, code, event_type, \
  effective_day, request_code, initiator_uuid, tx_time, payload, before_snapshot, after_snapshot";

/// Raw strings read directly from an `events` row.
pub struct RawEvent {
  pub id:              i64,
  pub tenant_id:       String,
  pub family:          String,
  pub dict_code:       String,
  pub code:            Option<String>,
  pub event_type:      String,
  pub effective_day:   String,
  pub request_code:    String,
  pub initiator_uuid:  String,
  pub tx_time:         String,
  pub payload:         String,
  pub before_snapshot: String,
  pub after_snapshot:  String,
}

impl RawEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      tenant_id:       row.get(1)?,
      family:          row.get(2)?,
      dict_code:       row.get(3)?,
      code:            row.get(4)?,
      event_type:      row.get(5)?,
      effective_day:   row.get(6)?,
      request_code:    row.get(7)?,
      initiator_uuid:  row.get(8)?,
      tx_time:         row.get(9)?,
      payload:         row.get(10)?,
      before_snapshot: row.get(11)?,
      after_snapshot:  row.get(12)?,
    })
  }

  pub fn into_event(self) -> Result<DictEvent> {
    Ok(DictEvent {
      id:              self.id,
      tenant:          decode_tenant(&self.tenant_id)?,
      family:          decode_family(&self.family)?,
      dict_code:       self.dict_code,
      code:            self.code,
      event_type:      decode_event_type(&self.event_type)?,
      effective_day:   decode_day(&self.effective_day)?,
      request_code:    self.request_code,
      initiator:       decode_uuid(&self.initiator_uuid)?,
      tx_time:         decode_dt(&self.tx_time)?,
      payload:         serde_json::from_str(&self.payload)?,
      before_snapshot: serde_json::from_str(&self.before_snapshot)?,
      after_snapshot:  serde_json::from_str(&self.after_snapshot)?,
    })
  }
}

/// Raw strings read directly from a `dict_segments` row.
pub struct RawDict {
  pub tenant_id:   String,
  pub dict_code:   String,
  pub name:        String,
  pub enabled_on:  String,
  pub disabled_on: Option<String>,
}

impl RawDict {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      tenant_id:   row.get(0)?,
      dict_code:   row.get(1)?,
      name:        row.get(2)?,
      enabled_on:  row.get(3)?,
      disabled_on: row.get(4)?,
    })
  }

  pub fn into_definition(self) -> Result<DictDefinition> {
    Ok(DictDefinition {
      tenant:      decode_tenant(&self.tenant_id)?,
      dict_code:   self.dict_code,
      name:        self.name,
      enabled_on:  decode_day(&self.enabled_on)?,
      disabled_on: self.disabled_on.as_deref().map(decode_day).transpose()?,
    })
  }
}

/// Raw strings read directly from a `value_segments` row.
pub struct RawValue {
  pub tenant_id:   String,
  pub dict_code:   String,
  pub code:        String,
  pub label:       String,
  pub enabled_on:  String,
  pub disabled_on: Option<String>,
}

impl RawValue {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      tenant_id:   row.get(0)?,
      dict_code:   row.get(1)?,
      code:        row.get(2)?,
      label:       row.get(3)?,
      enabled_on:  row.get(4)?,
      disabled_on: row.get(5)?,
    })
  }

  pub fn into_segment(self) -> Result<DictValueSegment> {
    Ok(DictValueSegment {
      tenant:      decode_tenant(&self.tenant_id)?,
      dict_code:   self.dict_code,
      code:        self.code,
      label:       self.label,
      enabled_on:  decode_day(&self.enabled_on)?,
      disabled_on: self.disabled_on.as_deref().map(decode_day).transpose()?,
    })
  }
}

/// Raw values read directly from a `releases` row.
pub struct RawRelease {
  pub target_tenant_id:     String,
  pub release_id:           String,
  pub source_tenant_id:     String,
  pub as_of:                String,
  pub request_code:         String,
  pub operator:             String,
  pub status:               String,
  pub dict_events_total:    i64,
  pub dict_events_applied:  i64,
  pub dict_events_retried:  i64,
  pub value_events_total:   i64,
  pub value_events_applied: i64,
  pub value_events_retried: i64,
  pub started_at:           String,
  pub finished_at:          Option<String>,
  pub error:                Option<String>,
}

impl RawRelease {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      target_tenant_id:     row.get(0)?,
      release_id:           row.get(1)?,
      source_tenant_id:     row.get(2)?,
      as_of:                row.get(3)?,
      request_code:         row.get(4)?,
      operator:             row.get(5)?,
      status:               row.get(6)?,
      dict_events_total:    row.get(7)?,
      dict_events_applied:  row.get(8)?,
      dict_events_retried:  row.get(9)?,
      value_events_total:   row.get(10)?,
      value_events_applied: row.get(11)?,
      value_events_retried: row.get(12)?,
      started_at:           row.get(13)?,
      finished_at:          row.get(14)?,
      error:                row.get(15)?,
    })
  }

  pub fn into_result(self) -> Result<PublishResult> {
    let status: ReleaseStatus = self
      .status
      .parse()
      .map_err(|_| Error::Decode(format!("unknown release status: {:?}", self.status)))?;
    Ok(PublishResult {
      release_id: self.release_id,
      source_tenant: decode_tenant(&self.source_tenant_id)?,
      target_tenant: decode_tenant(&self.target_tenant_id)?,
      as_of: decode_day(&self.as_of)?,
      request_code: self.request_code,
      operator: decode_uuid(&self.operator)?,
      status,
      dict_events_total: decode_count(self.dict_events_total)?,
      dict_events_applied: decode_count(self.dict_events_applied)?,
      dict_events_retried: decode_count(self.dict_events_retried)?,
      value_events_total: decode_count(self.value_events_total)?,
      value_events_applied: decode_count(self.value_events_applied)?,
      value_events_retried: decode_count(self.value_events_retried)?,
      started_at: decode_dt(&self.started_at)?,
      finished_at: self.finished_at.as_deref().map(decode_dt).transpose()?,
      error: self.error,
    })
  }
}
