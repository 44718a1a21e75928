//! Event types: the authoritative, append-only history of the registry.
//!
//! Events are written once and never updated. Snapshots are derived from them
//! (see [`crate::projection`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  dict::{DictKey, ValueKey},
  tenant::TenantId,
};

// ─── Discriminants ───────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EventType {
  Created,
  LabelCorrected,
  Disabled,
}

impl EventType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Created => "CREATED",
      Self::LabelCorrected => "LABEL_CORRECTED",
      Self::Disabled => "DISABLED",
    }
  }

  /// Whether the payload must carry the family's text field.
  pub fn carries_text(&self) -> bool { !matches!(self, Self::Disabled) }
}

/// The two event families. Idempotency is scoped per (tenant, family).
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventFamily {
  Dict,
  Value,
}

impl EventFamily {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Dict => "dict",
      Self::Value => "value",
    }
  }

  /// The payload field holding the display text for this family.
  pub fn text_field(&self) -> &'static str {
    match self {
      Self::Dict => "name",
      Self::Value => "label",
    }
  }
}

// ─── Persisted event ─────────────────────────────────────────────────────────

/// One row of the event log. `code` is `None` for dictionary events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictEvent {
  /// Monotonic; defines replay order.
  pub id:              i64,
  pub tenant:          TenantId,
  pub family:          EventFamily,
  pub dict_code:       String,
  pub code:            Option<String>,
  pub event_type:      EventType,
  pub effective_day:   NaiveDate,
  pub request_code:    String,
  pub initiator:       Uuid,
  pub tx_time:         DateTime<Utc>,
  pub payload:         serde_json::Value,
  pub before_snapshot: serde_json::Value,
  pub after_snapshot:  serde_json::Value,
}

impl DictEvent {
  /// Whether a re-submission describes the same change as this event.
  pub fn matches_intent<K: MutationKey>(&self, m: &Mutation<K>) -> bool {
    self.dict_code == m.key.dict_code()
      && self.code.as_deref() == m.key.code()
      && self.event_type == m.event_type
      && self.effective_day == m.effective_day
      && self.payload == m.payload
  }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Raw input for a dictionary definition change, before validation.
#[derive(Debug, Clone)]
pub struct NewDictEvent {
  pub dict_code:     String,
  pub event_type:    EventType,
  /// `YYYY-MM-DD`.
  pub effective_day: String,
  pub payload:       serde_json::Value,
  pub request_code:  String,
  pub initiator:     Uuid,
}

/// Raw input for a dictionary value change, before validation.
#[derive(Debug, Clone)]
pub struct NewValueEvent {
  pub dict_code:     String,
  pub code:          String,
  pub event_type:    EventType,
  /// `YYYY-MM-DD`.
  pub effective_day: String,
  pub payload:       serde_json::Value,
  pub request_code:  String,
  pub initiator:     Uuid,
}

/// A validated change ready for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<K> {
  pub key:           K,
  pub event_type:    EventType,
  pub effective_day: NaiveDate,
  pub payload:       serde_json::Value,
  /// The name or label carried by `CREATED` and `LABEL_CORRECTED`.
  pub text:          Option<String>,
  pub request_code:  String,
  pub initiator:     Uuid,
}

pub trait MutationKey {
  fn dict_code(&self) -> &str;
  fn code(&self) -> Option<&str>;
}

impl MutationKey for DictKey {
  fn dict_code(&self) -> &str { &self.dict_code }

  fn code(&self) -> Option<&str> { None }
}

impl MutationKey for ValueKey {
  fn dict_code(&self) -> &str { &self.dict_code }

  fn code(&self) -> Option<&str> { Some(&self.code) }
}

impl NewDictEvent {
  pub fn validate(self) -> Result<Mutation<DictKey>> {
    let dict_code = required("dict_code", &self.dict_code)?;
    let effective_day = parse_day("effective_day", &self.effective_day)?;
    let request_code = required("request_code", &self.request_code)?;
    let text = extract_text(EventFamily::Dict, self.event_type, &self.payload)?;
    Ok(Mutation {
      key: DictKey { dict_code },
      event_type: self.event_type,
      effective_day,
      payload: self.payload,
      text,
      request_code,
      initiator: self.initiator,
    })
  }
}

impl NewValueEvent {
  pub fn validate(self) -> Result<Mutation<ValueKey>> {
    let dict_code = required("dict_code", &self.dict_code)?;
    let code = required("code", &self.code)?;
    let effective_day = parse_day("effective_day", &self.effective_day)?;
    let request_code = required("request_code", &self.request_code)?;
    let text = extract_text(EventFamily::Value, self.event_type, &self.payload)?;
    Ok(Mutation {
      key: ValueKey { dict_code, code },
      event_type: self.event_type,
      effective_day,
      payload: self.payload,
      text,
      request_code,
      initiator: self.initiator,
    })
  }
}

/// The result of a submission through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome<S> {
  pub event_id:  i64,
  pub snapshot:  S,
  pub was_retry: bool,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn required(field: &str, raw: &str) -> Result<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(Error::validation(format!("{field} is required")));
  }
  Ok(trimmed.to_owned())
}

/// Parse a `YYYY-MM-DD` day; blank and malformed input are validation errors.
pub fn parse_day(field: &str, raw: &str) -> Result<NaiveDate> {
  let trimmed = required(field, raw)?;
  NaiveDate::parse_from_str(&trimmed, "%Y-%m-%d").map_err(|_| {
    Error::validation(format!("{field} must be YYYY-MM-DD, got {trimmed:?}"))
  })
}

fn extract_text(
  family: EventFamily,
  event_type: EventType,
  payload: &serde_json::Value,
) -> Result<Option<String>> {
  let Some(object) = payload.as_object() else {
    return Err(Error::validation("payload must be a JSON object"));
  };
  if !event_type.carries_text() {
    return Ok(None);
  }
  let field = family.text_field();
  match object.get(field).and_then(|v| v.as_str()).map(str::trim) {
    Some(text) if !text.is_empty() => Ok(Some(text.to_owned())),
    _ => Err(Error::validation(format!(
      "payload.{field} is required for {event_type}"
    ))),
  }
}
