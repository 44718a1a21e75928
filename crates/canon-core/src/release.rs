//! Baseline releases: diffing a source dataset against a target tenant and the
//! bookkeeping for replaying the source history into the target.
//!
//! Storage access lives in the backend; this module holds the parts that are
//! pure functions of their inputs.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  dict::{DictDefinition, DictValueSegment, Segment},
  event::EventFamily,
  tenant::TenantId,
};

// ─── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRequest {
  pub source_tenant: TenantId,
  pub target_tenant: TenantId,
  pub as_of:         NaiveDate,
  pub release_id:    String,
  /// Upper bound on listed conflicts; counts are never truncated.
  pub max_conflicts: usize,
}

impl BaselineRequest {
  pub const DEFAULT_MAX_CONFLICTS: usize = 200;

  /// A request releasing the global baseline into `target_tenant`.
  pub fn new(target_tenant: TenantId, as_of: NaiveDate, release_id: impl Into<String>) -> Self {
    Self {
      source_tenant: TenantId::GLOBAL,
      target_tenant,
      as_of,
      release_id: release_id.into(),
      max_conflicts: Self::DEFAULT_MAX_CONFLICTS,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.release_id.trim().is_empty() {
      return Err(Error::validation("release_id is required"));
    }
    if self.source_tenant == self.target_tenant {
      return Err(Error::validation("source and target tenant must differ"));
    }
    Ok(())
  }

  fn conflict_cap(&self) -> usize {
    match self.max_conflicts {
      0 => Self::DEFAULT_MAX_CONFLICTS,
      n => n,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
  pub baseline:     BaselineRequest,
  pub request_code: String,
  pub operator:     Uuid,
}

impl PublishRequest {
  pub fn validate(&self) -> Result<()> {
    self.baseline.validate()?;
    if self.request_code.trim().is_empty() {
      return Err(Error::validation("request_code is required"));
    }
    Ok(())
  }
}

// ─── Snapshot comparison ─────────────────────────────────────────────────────

/// The comparable content of one tenant on one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineSnapshot {
  /// dict_code → name
  pub dicts:  BTreeMap<String, String>,
  /// (dict_code, code) → label
  pub values: BTreeMap<(String, String), String>,
}

impl BaselineSnapshot {
  /// Keep only the windows active on `as_of`.
  pub fn from_rows(dicts: &[DictDefinition], values: &[DictValueSegment], as_of: NaiveDate) -> Self {
    Self {
      dicts:  dicts
        .iter()
        .filter(|d| d.is_active_on(as_of))
        .map(|d| (d.dict_code.clone(), d.name.clone()))
        .collect(),
      values: values
        .iter()
        .filter(|v| v.is_active_on(as_of))
        .map(|v| ((v.dict_code.clone(), v.code.clone()), v.label.clone()))
        .collect(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictKind {
  DictMissing,
  DictNameMismatch,
  ValueMissing,
  ValueLabelMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
  pub kind:      ConflictKind,
  pub dict_code: String,
  pub code:      Option<String>,
  /// The source name or label.
  pub source:    String,
  /// The target name or label, when present.
  pub target:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewReport {
  pub release_id:                 String,
  pub source_tenant:              TenantId,
  pub target_tenant:              TenantId,
  pub as_of:                      NaiveDate,
  pub source_dict_count:          usize,
  pub source_value_count:         usize,
  pub target_dict_count:          usize,
  pub target_value_count:         usize,
  pub dict_missing_count:         usize,
  pub dict_name_mismatch_count:   usize,
  pub value_missing_count:        usize,
  pub value_label_mismatch_count: usize,
  pub conflict_count:             usize,
  pub truncated:                  bool,
  pub conflicts:                  Vec<Conflict>,
}

impl PreviewReport {
  /// True when the target holds nothing that contradicts the source.
  pub fn is_publishable(&self) -> bool {
    self.dict_name_mismatch_count == 0 && self.value_label_mismatch_count == 0
  }
}

/// Compare `source` against `target`. Dictionary conflicts come first, then
/// value conflicts, each in key order.
pub fn diff(
  req: &BaselineRequest,
  source: &BaselineSnapshot,
  target: &BaselineSnapshot,
) -> PreviewReport {
  let cap = req.conflict_cap();
  let mut report = PreviewReport {
    release_id:                 req.release_id.clone(),
    source_tenant:              req.source_tenant,
    target_tenant:              req.target_tenant,
    as_of:                      req.as_of,
    source_dict_count:          source.dicts.len(),
    source_value_count:         source.values.len(),
    target_dict_count:          target.dicts.len(),
    target_value_count:         target.values.len(),
    dict_missing_count:         0,
    dict_name_mismatch_count:   0,
    value_missing_count:        0,
    value_label_mismatch_count: 0,
    conflict_count:             0,
    truncated:                  false,
    conflicts:                  Vec::new(),
  };

  let push = |report: &mut PreviewReport, conflict: Conflict| {
    match conflict.kind {
      ConflictKind::DictMissing => report.dict_missing_count += 1,
      ConflictKind::DictNameMismatch => report.dict_name_mismatch_count += 1,
      ConflictKind::ValueMissing => report.value_missing_count += 1,
      ConflictKind::ValueLabelMismatch => report.value_label_mismatch_count += 1,
    }
    report.conflict_count += 1;
    if report.conflicts.len() < cap {
      report.conflicts.push(conflict);
    } else {
      report.truncated = true;
    }
  };

  for (dict_code, name) in &source.dicts {
    let kind = match target.dicts.get(dict_code) {
      None => ConflictKind::DictMissing,
      Some(t) if t != name => ConflictKind::DictNameMismatch,
      Some(_) => continue,
    };
    push(&mut report, Conflict {
      kind,
      dict_code: dict_code.clone(),
      code: None,
      source: name.clone(),
      target: target.dicts.get(dict_code).cloned(),
    });
  }

  for ((dict_code, code), label) in &source.values {
    let existing = target.values.get(&(dict_code.clone(), code.clone()));
    let kind = match existing {
      None => ConflictKind::ValueMissing,
      Some(t) if t != label => ConflictKind::ValueLabelMismatch,
      Some(_) => continue,
    };
    push(&mut report, Conflict {
      kind,
      dict_code: dict_code.clone(),
      code: Some(code.clone()),
      source: label.clone(),
      target: existing.cloned(),
    });
  }

  report
}

// ─── Replay bookkeeping ──────────────────────────────────────────────────────

/// The `release` fragment merged into every replayed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
  pub release_id:          String,
  pub source_tenant_id:    TenantId,
  pub target_tenant_id:    TenantId,
  pub source_event_id:     i64,
  pub source_request_code: String,
  pub operator:            Uuid,
  pub as_of:               NaiveDate,
}

/// Return `payload` with `{"release": provenance}` merged in.
pub fn merge_provenance(payload: &serde_json::Value, provenance: &Provenance) -> Result<serde_json::Value> {
  let Some(object) = payload.as_object() else {
    return Err(Error::PayloadInvalid(format!(
      "source event {} payload is not a JSON object",
      provenance.source_event_id
    )));
  };
  let mut merged = object.clone();
  merged.insert("release".to_owned(), serde_json::to_value(provenance)?);
  Ok(serde_json::Value::Object(merged))
}

/// The deterministic request code a replayed event is submitted under.
pub fn replay_request_code(request_code: &str, family: EventFamily, source_event_id: i64) -> String {
  format!("{request_code}#{family}#{source_event_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseStatus {
  Running,
  Succeeded,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
  pub release_id:           String,
  pub source_tenant:        TenantId,
  pub target_tenant:        TenantId,
  pub as_of:                NaiveDate,
  pub request_code:         String,
  pub operator:             Uuid,
  pub status:               ReleaseStatus,
  pub dict_events_total:    usize,
  pub dict_events_applied:  usize,
  pub dict_events_retried:  usize,
  pub value_events_total:   usize,
  pub value_events_applied: usize,
  pub value_events_retried: usize,
  pub started_at:           DateTime<Utc>,
  pub finished_at:          Option<DateTime<Utc>>,
  pub error:                Option<String>,
}

impl PublishResult {
  pub fn start(req: &PublishRequest, started_at: DateTime<Utc>) -> Self {
    Self {
      release_id: req.baseline.release_id.clone(),
      source_tenant: req.baseline.source_tenant,
      target_tenant: req.baseline.target_tenant,
      as_of: req.baseline.as_of,
      request_code: req.request_code.clone(),
      operator: req.operator,
      status: ReleaseStatus::Running,
      dict_events_total: 0,
      dict_events_applied: 0,
      dict_events_retried: 0,
      value_events_total: 0,
      value_events_applied: 0,
      value_events_retried: 0,
      started_at,
      finished_at: None,
      error: None,
    }
  }

  /// Count one replayed event.
  pub fn record(&mut self, family: EventFamily, was_retry: bool) {
    let (total, applied, retried) = match family {
      EventFamily::Dict => (
        &mut self.dict_events_total,
        &mut self.dict_events_applied,
        &mut self.dict_events_retried,
      ),
      EventFamily::Value => (
        &mut self.value_events_total,
        &mut self.value_events_applied,
        &mut self.value_events_retried,
      ),
    };
    *total += 1;
    if was_retry {
      *retried += 1;
    } else {
      *applied += 1;
    }
  }

  pub fn finish(&mut self, status: ReleaseStatus, at: DateTime<Utc>, error: Option<String>) {
    self.status = status;
    self.finished_at = Some(at);
    self.error = error;
  }
}
