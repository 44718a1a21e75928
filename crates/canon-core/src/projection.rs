//! The projection: how events turn into validity windows.
//!
//! [`apply`] is the single transition function. The gateway uses it for each
//! new event against the key's latest window; [`rebuild_dicts`] and
//! [`rebuild_values`] fold a whole event history through it, so snapshots can
//! be dropped and re-derived at any time.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
  Error, Result,
  dict::{DictDefinition, DictKey, DictValueSegment, Segment, ValueKey},
  event::{DictEvent, EventType, MutationKey},
  tenant::TenantId,
};

/// The effect of one event on one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
  /// The key's latest window before the event, if any.
  pub before: Option<S>,
  /// The previously open window, now closed on the event's day.
  pub closed: Option<S>,
  /// A newly opened window.
  pub opened: Option<S>,
  /// The window that best describes the key after the event.
  pub after:  S,
}

/// Apply one event to the key's latest window.
///
/// Events on a key must arrive in strictly increasing effective-day order.
pub fn apply<S>(
  tenant: TenantId,
  key: &S::Key,
  latest: Option<&S>,
  event_type: EventType,
  text: Option<&str>,
  day: NaiveDate,
) -> Result<Transition<S>>
where
  S: Segment,
{
  if let Some(prev) = latest {
    let last = prev.last_effective_day();
    if day <= last {
      return Err(Error::OutOfOrder {
        key: key.to_string(),
        last,
        attempted: day,
      });
    }
  }

  let open_window = latest.filter(|s| s.disabled_on().is_none());

  match event_type {
    EventType::Created => {
      if open_window.is_some() {
        return Err(Error::AlreadyExists { key: key.to_string() });
      }
      let opened = S::open(tenant, key, require_text(text, event_type)?, day);
      Ok(Transition {
        before: latest.cloned(),
        closed: None,
        opened: Some(opened.clone()),
        after:  opened,
      })
    }
    EventType::LabelCorrected => {
      let current = open_window.ok_or_else(|| inactive(key, latest))?;
      let mut closed = current.clone();
      closed.close(day);
      let opened = S::open(tenant, key, require_text(text, event_type)?, day);
      Ok(Transition {
        before: latest.cloned(),
        closed: Some(closed),
        opened: Some(opened.clone()),
        after:  opened,
      })
    }
    EventType::Disabled => {
      let current = open_window.ok_or_else(|| inactive(key, latest))?;
      let mut closed = current.clone();
      closed.close(day);
      Ok(Transition {
        before: latest.cloned(),
        closed: Some(closed.clone()),
        opened: None,
        after:  closed,
      })
    }
  }
}

fn require_text(text: Option<&str>, event_type: EventType) -> Result<String> {
  text
    .map(str::to_owned)
    .ok_or_else(|| Error::validation(format!("{event_type} requires a text value")))
}

/// The error for touching a key with no open window.
fn inactive<S, K>(key: &K, latest: Option<&S>) -> Error
where
  K: MutationKey + std::fmt::Display,
{
  match (latest, key.code()) {
    (Some(_), _) => Error::AlreadyDisabled { key: key.to_string() },
    (None, Some(code)) => Error::ValueNotFound {
      dict_code: key.dict_code().to_owned(),
      code:      code.to_owned(),
    },
    (None, None) => Error::DictNotFound {
      dict_code: key.dict_code().to_owned(),
    },
  }
}

// ─── Rebuild ─────────────────────────────────────────────────────────────────

/// Fold events (already in id order) into windows, grouped by key. Each
/// window is paired with the id of the last event that touched it.
fn rebuild<S, F>(tenant: TenantId, events: &[DictEvent], key_of: F) -> Result<Vec<(S, i64)>>
where
  S: Segment,
  F: Fn(&DictEvent) -> Result<S::Key>,
{
  let mut windows: BTreeMap<S::Key, Vec<(S, i64)>> = BTreeMap::new();

  for event in events.iter().filter(|e| e.family == S::FAMILY) {
    let key = key_of(event)?;
    let history = windows.entry(key.clone()).or_default();
    let text = event
      .payload
      .get(S::FAMILY.text_field())
      .and_then(|v| v.as_str())
      .map(str::trim);

    let step = apply::<S>(
      tenant,
      &key,
      history.last().map(|(s, _)| s),
      event.event_type,
      text,
      event.effective_day,
    )?;

    if let Some(closed) = step.closed {
      history.pop();
      history.push((closed, event.id));
    }
    if let Some(opened) = step.opened {
      history.push((opened, event.id));
    }
  }

  Ok(windows.into_values().flatten().collect())
}

pub fn rebuild_dicts(tenant: TenantId, events: &[DictEvent]) -> Result<Vec<(DictDefinition, i64)>> {
  rebuild(tenant, events, |e| {
    Ok(DictKey { dict_code: e.dict_code.clone() })
  })
}

pub fn rebuild_values(
  tenant: TenantId,
  events: &[DictEvent],
) -> Result<Vec<(DictValueSegment, i64)>> {
  rebuild(tenant, events, |e| {
    let code = e.code.clone().ok_or_else(|| {
      Error::validation(format!("value event {} has no code", e.id))
    })?;
    Ok(ValueKey { dict_code: e.dict_code.clone(), code })
  })
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use serde_json::json;
  use uuid::Uuid;

  use super::*;
  use crate::event::EventFamily;

  fn day(s: &str) -> NaiveDate { NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap() }

  fn key() -> ValueKey {
    ValueKey { dict_code: "org_type".into(), code: "10".into() }
  }

  fn event(id: i64, event_type: EventType, on: &str, label: Option<&str>) -> DictEvent {
    DictEvent {
      id,
      tenant: TenantId::GLOBAL,
      family: EventFamily::Value,
      dict_code: "org_type".into(),
      code: Some("10".into()),
      event_type,
      effective_day: day(on),
      request_code: format!("r{id}"),
      initiator: Uuid::nil(),
      tx_time: Utc::now(),
      payload: label.map_or_else(|| json!({}), |l| json!({ "label": l })),
      before_snapshot: json!(null),
      after_snapshot: json!(null),
    }
  }

  #[test]
  fn created_opens_window() {
    let t = apply::<DictValueSegment>(
      TenantId::GLOBAL,
      &key(),
      None,
      EventType::Created,
      Some("Dept"),
      day("2024-01-01"),
    )
    .unwrap();
    assert!(t.before.is_none());
    assert!(t.closed.is_none());
    assert_eq!(t.after.label, "Dept");
    assert_eq!(t.after.disabled_on, None);
  }

  #[test]
  fn correction_closes_prior_window() {
    let first = DictValueSegment::open(TenantId::GLOBAL, &key(), "Dept".into(), day("2024-01-01"));
    let t = apply(
      TenantId::GLOBAL,
      &key(),
      Some(&first),
      EventType::LabelCorrected,
      Some("Department"),
      day("2024-06-01"),
    )
    .unwrap();
    assert_eq!(t.closed.unwrap().disabled_on, Some(day("2024-06-01")));
    assert_eq!(t.after.enabled_on, day("2024-06-01"));
    assert_eq!(t.after.label, "Department");
  }

  #[test]
  fn events_must_move_forward() {
    let first = DictValueSegment::open(TenantId::GLOBAL, &key(), "Dept".into(), day("2024-06-01"));
    let err = apply(
      TenantId::GLOBAL,
      &key(),
      Some(&first),
      EventType::Disabled,
      None,
      day("2024-06-01"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::OutOfOrder { .. }));
  }

  #[test]
  fn disabling_twice_conflicts() {
    let mut closed = DictValueSegment::open(TenantId::GLOBAL, &key(), "Dept".into(), day("2024-01-01"));
    closed.close(day("2024-02-01"));
    let err = apply(
      TenantId::GLOBAL,
      &key(),
      Some(&closed),
      EventType::Disabled,
      None,
      day("2024-03-01"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::AlreadyDisabled { .. }));
  }

  #[test]
  fn correcting_unknown_value_is_not_found() {
    let err = apply::<DictValueSegment>(
      TenantId::GLOBAL,
      &key(),
      None,
      EventType::LabelCorrected,
      Some("x"),
      day("2024-03-01"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ValueNotFound { .. }));
  }

  #[test]
  fn recreate_after_disable_opens_new_window() {
    let events = vec![
      event(1, EventType::Created, "2024-01-01", Some("A")),
      event(2, EventType::Disabled, "2024-02-01", None),
      event(3, EventType::Created, "2024-03-01", Some("B")),
    ];
    let rows = rebuild_values(TenantId::GLOBAL, &events).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0.disabled_on, Some(day("2024-02-01")));
    assert_eq!(rows[0].1, 2);
    assert_eq!(rows[1].0.label, "B");
    assert_eq!(rows[1].0.disabled_on, None);
    assert_eq!(rows[1].1, 3);
  }

  #[test]
  fn rebuild_produces_disjoint_windows() {
    let events = vec![
      event(1, EventType::Created, "2024-01-01", Some("A")),
      event(2, EventType::LabelCorrected, "2024-03-01", Some("B")),
      event(3, EventType::LabelCorrected, "2024-05-01", Some("C")),
      event(4, EventType::Disabled, "2024-07-01", None),
    ];
    let rows = rebuild_values(TenantId::GLOBAL, &events).unwrap();
    let windows: Vec<_> = rows
      .iter()
      .map(|(r, _)| (r.label.as_str(), r.enabled_on, r.disabled_on))
      .collect();
    assert_eq!(windows, vec![
      ("A", day("2024-01-01"), Some(day("2024-03-01"))),
      ("B", day("2024-03-01"), Some(day("2024-05-01"))),
      ("C", day("2024-05-01"), Some(day("2024-07-01"))),
    ]);
  }
}
