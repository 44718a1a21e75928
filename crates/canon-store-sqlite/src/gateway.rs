//! The mutation gateway: the one write path for both event families.
//!
//! Organic submissions and release replays both end up in [`submit`], so
//! validation, idempotency and temporal ordering apply the same way to both.

use canon_core::{
  dict::{DictDefinition, DictKey, DictValueSegment, Segment, ValueKey},
  event::{DictEvent, Mutation, SubmitOutcome},
  fallback,
  projection::{self, Transition},
  query::applicable_on,
};
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::{
  Error, Result,
  tx::{Stored, TenantTx},
};

pub fn submit_dict(
  tx: &mut TenantTx<'_>,
  m: Mutation<DictKey>,
) -> Result<SubmitOutcome<DictDefinition>> {
  submit::<DictDefinition, _>(tx, m, |_, _| Ok(()))
}

pub fn submit_value(
  tx: &mut TenantTx<'_>,
  m: Mutation<ValueKey>,
) -> Result<SubmitOutcome<DictValueSegment>> {
  submit::<DictValueSegment, _>(tx, m, |tx, m| {
    ensure_dict_active(tx, &m.key.dict_code, m.effective_day)
  })
}

fn submit<S, F>(
  tx: &mut TenantTx<'_>,
  m: Mutation<S::Key>,
  precheck: F,
) -> Result<SubmitOutcome<S>>
where
  S: Stored,
  F: FnOnce(&mut TenantTx<'_>, &Mutation<S::Key>) -> Result<()>,
{
  if let Some(prior) = tx.find_event(S::FAMILY, &m.request_code)? {
    return replay_prior(prior, &m);
  }

  precheck(tx, &m)?;

  let history = S::load_key(tx, &m.key)?;
  let step = projection::apply::<S>(
    tx.tenant(),
    &m.key,
    history.last(),
    m.event_type,
    m.text.as_deref(),
    m.effective_day,
  )?;

  record(tx, &m, step)
}

/// Append the event for an already computed transition and persist its
/// windows. A request code that lands between the existence check and the
/// insert is answered as a retry.
pub fn record<S: Stored>(
  tx: &mut TenantTx<'_>,
  m: &Mutation<S::Key>,
  step: Transition<S>,
) -> Result<SubmitOutcome<S>> {
  let before = serde_json::to_value(&step.before)?;
  let after = serde_json::to_value(&step.after)?;

  let Some(event_id) = tx.insert_event(S::FAMILY, m, &before, &after)? else {
    let prior = tx
      .find_event(S::FAMILY, &m.request_code)?
      .ok_or_else(|| Error::Decode(format!("request code {:?} vanished", m.request_code)))?;
    return replay_prior(prior, m);
  };

  if let Some(closed) = &step.closed {
    closed.save_closed(tx, event_id)?;
  }
  if let Some(opened) = &step.opened {
    opened.save_opened(tx, event_id)?;
  }

  info!(
    tenant = %tx.tenant(),
    family = %S::FAMILY,
    key = %m.key,
    event_type = %m.event_type,
    event_id,
    "event appended"
  );

  Ok(SubmitOutcome {
    event_id,
    snapshot: step.after,
    was_retry: false,
  })
}

/// Answer a repeated request code with the snapshot recorded the first time.
fn replay_prior<S: Segment>(
  prior: DictEvent,
  m: &Mutation<S::Key>,
) -> Result<SubmitOutcome<S>> {
  if !prior.matches_intent(m) {
    return Err(
      canon_core::Error::RetryMismatch {
        request_code: m.request_code.clone(),
      }
      .into(),
    );
  }
  debug!(
    tenant = %prior.tenant,
    request_code = %prior.request_code,
    event_id = prior.id,
    "idempotent retry"
  );
  Ok(SubmitOutcome {
    event_id:  prior.id,
    snapshot:  serde_json::from_value(prior.after_snapshot)?,
    was_retry: true,
  })
}

/// The dictionary must be active on `day` in the tenant, or globally when the
/// tenant has no applicable definition.
pub fn ensure_dict_active(tx: &mut TenantTx<'_>, dict_code: &str, day: NaiveDate) -> Result<()> {
  let active = fallback::resolve(tx.tenant(), |scope| {
    tx.scoped(scope, |tx| {
      Ok(applicable_on(&tx.dict_rows(Some(dict_code))?, day).cloned())
    })
  })?;
  if active.value.is_some() {
    return Ok(());
  }

  let known = fallback::resolve(tx.tenant(), |scope| {
    tx.scoped(scope, |tx| tx.dict_rows(Some(dict_code)))
  })?;
  let dict_code = dict_code.to_owned();
  Err(if known.value.is_empty() {
    canon_core::Error::DictNotFound { dict_code }.into()
  } else {
    canon_core::Error::DictDisabled { dict_code, day }.into()
  })
}
