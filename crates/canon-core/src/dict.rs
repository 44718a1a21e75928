//! Snapshot types: the derived, rebuildable current state of the registry.
//!
//! Both dictionary definitions and dictionary values are stored as validity
//! windows. A key owns one row per window; windows for the same key never
//! overlap and are half-open: `[enabled_on, disabled_on)`.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
  event::{EventFamily, MutationKey},
  tenant::TenantId,
};

// ─── Keys ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DictKey {
  pub dict_code: String,
}

impl fmt::Display for DictKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "dict {}", self.dict_code)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueKey {
  pub dict_code: String,
  pub code:      String,
}

impl fmt::Display for ValueKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "value {}/{}", self.dict_code, self.code)
  }
}

// ─── Segment abstraction ─────────────────────────────────────────────────────

/// A validity-window row. Implemented by both snapshot families so the
/// projection and the temporal filters are written once.
pub trait Segment: Clone + Serialize + DeserializeOwned + Send + 'static {
  type Key: Clone + Ord + fmt::Display + Send + MutationKey;

  const FAMILY: EventFamily;

  /// A fresh open window starting on `day`.
  fn open(tenant: TenantId, key: &Self::Key, text: String, day: NaiveDate) -> Self;

  fn key(&self) -> Self::Key;

  /// The code searched by keyword and used for ordering: the dictionary code
  /// for definitions, the value code for values.
  fn code(&self) -> &str;

  /// The display text: a dictionary name or a value label.
  fn text(&self) -> &str;

  fn tenant(&self) -> TenantId;

  fn enabled_on(&self) -> NaiveDate;

  fn disabled_on(&self) -> Option<NaiveDate>;

  fn close(&mut self, day: NaiveDate);

  /// Whether `day` falls inside `[enabled_on, disabled_on)`.
  fn is_active_on(&self, day: NaiveDate) -> bool {
    self.enabled_on() <= day && self.disabled_on().is_none_or(|end| day < end)
  }

  /// The last day on which an event touched this window.
  fn last_effective_day(&self) -> NaiveDate {
    self.disabled_on().unwrap_or(self.enabled_on())
  }
}

// ─── DictDefinition ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictDefinition {
  pub tenant:      TenantId,
  pub dict_code:   String,
  pub name:        String,
  pub enabled_on:  NaiveDate,
  pub disabled_on: Option<NaiveDate>,
}

impl Segment for DictDefinition {
  type Key = DictKey;

  const FAMILY: EventFamily = EventFamily::Dict;

  fn open(tenant: TenantId, key: &DictKey, text: String, day: NaiveDate) -> Self {
    Self {
      tenant,
      dict_code: key.dict_code.clone(),
      name: text,
      enabled_on: day,
      disabled_on: None,
    }
  }

  fn key(&self) -> DictKey {
    DictKey { dict_code: self.dict_code.clone() }
  }

  fn code(&self) -> &str { &self.dict_code }

  fn text(&self) -> &str { &self.name }

  fn tenant(&self) -> TenantId { self.tenant }

  fn enabled_on(&self) -> NaiveDate { self.enabled_on }

  fn disabled_on(&self) -> Option<NaiveDate> { self.disabled_on }

  fn close(&mut self, day: NaiveDate) { self.disabled_on = Some(day); }
}

// ─── DictValueSegment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictValueSegment {
  pub tenant:      TenantId,
  pub dict_code:   String,
  pub code:        String,
  pub label:       String,
  pub enabled_on:  NaiveDate,
  pub disabled_on: Option<NaiveDate>,
}

impl Segment for DictValueSegment {
  type Key = ValueKey;

  const FAMILY: EventFamily = EventFamily::Value;

  fn open(tenant: TenantId, key: &ValueKey, text: String, day: NaiveDate) -> Self {
    Self {
      tenant,
      dict_code: key.dict_code.clone(),
      code: key.code.clone(),
      label: text,
      enabled_on: day,
      disabled_on: None,
    }
  }

  fn key(&self) -> ValueKey {
    ValueKey {
      dict_code: self.dict_code.clone(),
      code:      self.code.clone(),
    }
  }

  fn code(&self) -> &str { &self.code }

  fn text(&self) -> &str { &self.label }

  fn tenant(&self) -> TenantId { self.tenant }

  fn enabled_on(&self) -> NaiveDate { self.enabled_on }

  fn disabled_on(&self) -> Option<NaiveDate> { self.disabled_on }

  fn close(&mut self, day: NaiveDate) { self.disabled_on = Some(day); }
}
