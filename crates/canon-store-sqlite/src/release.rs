//! Baseline preview and publish.
//!
//! Both run in a single transaction that starts in the source tenant's
//! context and switches to the target explicitly. Publish replays every source
//! event through the gateway, so it either lands completely or not at all.

use canon_core::{
  Error as CoreError,
  event::{DictEvent, EventFamily, NewDictEvent, NewValueEvent},
  release::{
    BaselineRequest, BaselineSnapshot, PreviewReport, Provenance, PublishRequest, PublishResult,
    ReleaseStatus, diff, merge_provenance, replay_request_code,
  },
};
use chrono::Utc;
use tracing::info;

use crate::{Error, Result, encode::encode_day, gateway, tx::TenantTx};

/// The active tenant's windows, reduced to what is active on `as_of`.
fn snapshot(tx: &TenantTx<'_>, as_of: chrono::NaiveDate) -> Result<BaselineSnapshot> {
  let dicts = tx.dict_rows(None)?;
  let values = tx.value_rows(None, None)?;
  Ok(BaselineSnapshot::from_rows(&dicts, &values, as_of))
}

/// `tx` must be active in the source tenant.
pub fn preview(tx: &mut TenantTx<'_>, req: &BaselineRequest) -> Result<PreviewReport> {
  let source = snapshot(tx, req.as_of)?;
  tx.switch_tenant(req.target_tenant);
  let target = snapshot(tx, req.as_of)?;
  Ok(diff(req, &source, &target))
}

/// `tx` must be active in the source tenant.
pub fn publish(tx: &mut TenantTx<'_>, req: &PublishRequest) -> Result<PublishResult> {
  let baseline = &req.baseline;
  let events = tx.events(None, 0, Some(baseline.as_of), None)?;
  if events.is_empty() {
    return Err(
      CoreError::BaselineNotReady {
        source_tenant: baseline.source_tenant,
        as_of:         baseline.as_of,
      }
      .into(),
    );
  }

  let mut result = PublishResult::start(req, Utc::now());
  info!(
    release_id = %baseline.release_id,
    source = %baseline.source_tenant,
    target = %baseline.target_tenant,
    as_of = %baseline.as_of,
    events = events.len(),
    "publishing baseline"
  );

  tx.switch_tenant(baseline.target_tenant);
  tx.save_release(&result)?;

  for event in events {
    let family = event.family;
    let was_retry = replay(tx, req, event)?;
    result.record(family, was_retry);
  }

  result.finish(ReleaseStatus::Succeeded, Utc::now(), None);
  tx.save_release(&result)?;

  info!(
    release_id = %baseline.release_id,
    dict_applied = result.dict_events_applied,
    dict_retried = result.dict_events_retried,
    value_applied = result.value_events_applied,
    value_retried = result.value_events_retried,
    "baseline published"
  );
  Ok(result)
}

/// Submit one source event into the active (target) tenant. Returns whether
/// the gateway treated it as a retry.
fn replay(tx: &mut TenantTx<'_>, req: &PublishRequest, event: DictEvent) -> Result<bool> {
  let baseline = &req.baseline;
  let provenance = Provenance {
    release_id:          baseline.release_id.clone(),
    source_tenant_id:    baseline.source_tenant,
    target_tenant_id:    baseline.target_tenant,
    source_event_id:     event.id,
    source_request_code: event.request_code.clone(),
    operator:            req.operator,
    as_of:               baseline.as_of,
  };
  let payload = merge_provenance(&event.payload, &provenance)?;
  let request_code = replay_request_code(&req.request_code, event.family, event.id);
  let effective_day = encode_day(event.effective_day);

  match event.family {
    EventFamily::Dict => {
      let m = NewDictEvent {
        dict_code: event.dict_code,
        event_type: event.event_type,
        effective_day,
        payload,
        request_code,
        initiator: req.operator,
      }
      .validate()?;
      Ok(gateway::submit_dict(tx, m)?.was_retry)
    }
    EventFamily::Value => {
      let code = event
        .code
        .ok_or_else(|| Error::Decode(format!("value event {} has no code", event.id)))?;
      let m = NewValueEvent {
        dict_code: event.dict_code,
        code,
        event_type: event.event_type,
        effective_day,
        payload,
        request_code,
        initiator: req.operator,
      }
      .validate()?;
      Ok(gateway::submit_value(tx, m)?.was_retry)
    }
  }
}
