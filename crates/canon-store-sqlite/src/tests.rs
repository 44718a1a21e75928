//! Integration tests for `SqliteRegistry` against an in-memory database.

use canon_core::{
  ErrorKind,
  dict::DictDefinition,
  event::{EventFamily, EventType, NewDictEvent, NewValueEvent},
  query::{Limit, ListQuery, StatusFilter},
  registry::DictionaryRegistry,
  release::{BaselineRequest, PublishRequest, ReleaseStatus},
  projection,
  tenant::TenantId,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::{SqliteRegistry, gateway, schema::SCHEMA, tx::TenantTx};

async fn registry() -> SqliteRegistry {
  SqliteRegistry::open_in_memory()
    .await
    .expect("in-memory registry")
}

fn day(s: &str) -> NaiveDate { NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap() }

fn tenant(n: u128) -> TenantId { TenantId::new(Uuid::from_u128(n)) }

fn operator() -> Uuid { Uuid::from_u128(7) }

fn dict_event(code: &str, kind: EventType, on: &str, name: &str, rc: &str) -> NewDictEvent {
  NewDictEvent {
    dict_code:     code.into(),
    event_type:    kind,
    effective_day: on.into(),
    payload:       if kind == EventType::Disabled { json!({}) } else { json!({ "name": name }) },
    request_code:  rc.into(),
    initiator:     operator(),
  }
}

fn value_event(
  dict: &str,
  code: &str,
  kind: EventType,
  on: &str,
  label: &str,
  rc: &str,
) -> NewValueEvent {
  NewValueEvent {
    dict_code:     dict.into(),
    code:          code.into(),
    event_type:    kind,
    effective_day: on.into(),
    payload:       if kind == EventType::Disabled { json!({}) } else { json!({ "label": label }) },
    request_code:  rc.into(),
    initiator:     operator(),
  }
}

/// Seed `org_type` with value `10` in `t`, both effective 2024-01-01.
async fn seed_org_type(r: &SqliteRegistry, t: TenantId) {
  r.submit_dict_event(t, dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "d1"))
    .await
    .unwrap();
  r.submit_value_event(
    t,
    value_event("org_type", "10", EventType::Created, "2024-01-01", "部门", "v1"),
  )
  .await
  .unwrap();
}

// ─── Mutation gateway ────────────────────────────────────────────────────────

#[tokio::test]
async fn resubmitting_a_request_code_is_a_retry() {
  let r = registry().await;
  let t = tenant(1);
  r.submit_dict_event(t, dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "d1"))
    .await
    .unwrap();

  let input = value_event("org_type", "10", EventType::Created, "2024-01-01", "部门", "v1");
  let first = r.submit_value_event(t, input.clone()).await.unwrap();
  let second = r.submit_value_event(t, input).await.unwrap();

  assert!(!first.was_retry);
  assert!(second.was_retry);
  assert_eq!(first.event_id, second.event_id);
  assert_eq!(first.snapshot, second.snapshot);

  let events = r
    .list_events(t, EventFamily::Value, 0, Limit::default())
    .await
    .unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].request_code, "v1");
}

#[tokio::test]
async fn reused_request_code_with_different_intent_conflicts() {
  let r = registry().await;
  let t = tenant(1);
  seed_org_type(&r, t).await;

  let err = r
    .submit_value_event(
      t,
      value_event("org_type", "10", EventType::Created, "2024-01-01", "科室", "v1"),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn request_codes_are_scoped_per_family() {
  let r = registry().await;
  let t = tenant(1);
  r.submit_dict_event(t, dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "same"))
    .await
    .unwrap();
  let out = r
    .submit_value_event(
      t,
      value_event("org_type", "10", EventType::Created, "2024-01-01", "部门", "same"),
    )
    .await
    .unwrap();
  assert!(!out.was_retry);
}

#[tokio::test]
async fn blank_fields_are_rejected_before_storage() {
  let r = registry().await;
  let t = tenant(1);

  let err = r
    .submit_dict_event(t, dict_event("  ", EventType::Created, "2024-01-01", "Org Type", "d1"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);

  let err = r
    .submit_dict_event(t, dict_event("org_type", EventType::Created, "2024-13-01", "Org Type", "d1"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);

  let events = r
    .list_events(t, EventFamily::Dict, 0, Limit::default())
    .await
    .unwrap();
  assert!(events.is_empty());
}

#[tokio::test]
async fn value_requires_an_active_dictionary() {
  let r = registry().await;
  let t = tenant(1);

  let err = r
    .submit_value_event(
      t,
      value_event("missing", "10", EventType::Created, "2024-01-01", "x", "v1"),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);

  r.submit_dict_event(t, dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "d1"))
    .await
    .unwrap();
  r.submit_dict_event(t, dict_event("org_type", EventType::Disabled, "2024-03-01", "", "d2"))
    .await
    .unwrap();

  let err = r
    .submit_value_event(
      t,
      value_event("org_type", "10", EventType::Created, "2024-04-01", "部门", "v1"),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert!(matches!(
    err,
    crate::Error::Core(canon_core::Error::DictDisabled { .. })
  ));
}

#[tokio::test]
async fn value_may_reference_a_global_dictionary() {
  let r = registry().await;
  r.submit_dict_event(
    TenantId::GLOBAL,
    dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "d1"),
  )
  .await
  .unwrap();

  let out = r
    .submit_value_event(
      tenant(1),
      value_event("org_type", "99", EventType::Created, "2024-02-01", "Local", "v1"),
    )
    .await
    .unwrap();
  assert_eq!(out.snapshot.tenant, tenant(1));
}

#[tokio::test]
async fn events_must_advance_per_key() {
  let r = registry().await;
  let t = tenant(1);
  seed_org_type(&r, t).await;

  let err = r
    .submit_value_event(
      t,
      value_event("org_type", "10", EventType::LabelCorrected, "2024-01-01", "x", "v2"),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);

  let err = r
    .submit_value_event(
      t,
      value_event("org_type", "10", EventType::Created, "2024-02-01", "x", "v3"),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn storage_rejects_a_duplicate_request_code() {
  let conn = Connection::open_in_memory().unwrap();
  conn.execute_batch(SCHEMA).unwrap();
  let insert = |tenant: &str| {
    conn.execute(
      "INSERT INTO events (
         tenant_id, family, dict_code, code, event_type, effective_day,
         request_code, initiator_uuid, tx_time, payload, before_snapshot, after_snapshot
       ) VALUES (?1, 'dict', 'org_type', NULL, 'CREATED', '2024-01-01',
                 'd1', 'op', '2024-01-01T00:00:00Z', '{}', 'null', '{}')",
      [tenant],
    )
  };

  insert("t1").unwrap();
  let err = insert("t1").unwrap_err();
  assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::ConstraintViolation));
  insert("t2").unwrap();
}

#[test]
fn insert_losing_to_a_concurrent_submission_is_a_retry() {
  let t = tenant(1);
  let mut conn = Connection::open_in_memory().unwrap();
  conn.execute_batch(SCHEMA).unwrap();
  let mut tx = TenantTx::activate(conn.transaction().unwrap(), t);

  let m = dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "d1")
    .validate()
    .unwrap();
  let step = projection::apply::<DictDefinition>(
    t,
    &m.key,
    None,
    m.event_type,
    m.text.as_deref(),
    m.effective_day,
  )
  .unwrap();

  // Both computed their transition before either inserted.
  let first = gateway::record(&mut tx, &m, step.clone()).unwrap();
  let second = gateway::record(&mut tx, &m, step).unwrap();

  assert!(!first.was_retry);
  assert!(second.was_retry);
  assert_eq!(second.event_id, first.event_id);
  assert_eq!(second.snapshot, first.snapshot);
  assert_eq!(tx.events(None, 0, None, None).unwrap().len(), 1);
}

// ─── Temporal reads ──────────────────────────────────────────────────────────

#[tokio::test]
async fn label_correction_splits_the_window() {
  let r = registry().await;
  let t = tenant(1);
  seed_org_type(&r, t).await;

  let out = r
    .submit_value_event(
      t,
      value_event("org_type", "10", EventType::LabelCorrected, "2024-06-01", "科室", "v2"),
    )
    .await
    .unwrap();
  assert_eq!(out.snapshot.enabled_on, day("2024-06-01"));
  assert_eq!(out.snapshot.disabled_on, None);

  let before = r
    .resolve_label(t, day("2024-05-31"), "org_type".into(), "10".into())
    .await
    .unwrap();
  let after = r
    .resolve_label(t, day("2024-06-01"), "org_type".into(), "10".into())
    .await
    .unwrap();
  assert_eq!(before.as_deref(), Some("部门"));
  assert_eq!(after.as_deref(), Some("科室"));

  let mut query = ListQuery::new(day("2024-07-01"));
  query.status = StatusFilter::Inactive;
  let closed = r.list_values(t, "org_type".into(), query).await.unwrap();
  assert_eq!(closed.len(), 1);
  assert_eq!(closed[0].disabled_on, Some(day("2024-06-01")));
}

#[tokio::test]
async fn disabled_value_has_no_label_from_its_end_day() {
  let r = registry().await;
  let t = tenant(1);
  seed_org_type(&r, t).await;
  r.submit_value_event(t, value_event("org_type", "10", EventType::Disabled, "2024-03-01", "", "v2"))
    .await
    .unwrap();

  let label = r
    .resolve_label(t, day("2024-03-01"), "org_type".into(), "10".into())
    .await
    .unwrap();
  assert_eq!(label, None);

  let err = r
    .submit_value_event(t, value_event("org_type", "10", EventType::Disabled, "2024-04-01", "", "v3"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn resolve_label_falls_back_to_global() {
  let r = registry().await;
  seed_org_type(&r, TenantId::GLOBAL).await;

  let found = r
    .resolve_label(tenant(1), day("2024-02-01"), "org_type".into(), "10".into())
    .await
    .unwrap();
  assert_eq!(found.as_deref(), Some("部门"));

  let missing = r
    .resolve_label(tenant(1), day("2024-02-01"), "org_type".into(), "404".into())
    .await
    .unwrap();
  assert_eq!(missing, None);

  let too_early = r
    .resolve_label(tenant(1), day("2023-12-31"), "org_type".into(), "10".into())
    .await
    .unwrap();
  assert_eq!(too_early, None);
}

#[tokio::test]
async fn tenant_rows_shadow_global_rows() {
  let r = registry().await;
  let t = tenant(1);
  seed_org_type(&r, TenantId::GLOBAL).await;
  r.submit_value_event(
    t,
    value_event("org_type", "20", EventType::Created, "2024-01-01", "单位", "v9"),
  )
  .await
  .unwrap();

  let rows = r
    .list_values(t, "org_type".into(), ListQuery::new(day("2024-02-01")))
    .await
    .unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].code, "20");

  let other = r
    .list_values(tenant(2), "org_type".into(), ListQuery::new(day("2024-02-01")))
    .await
    .unwrap();
  assert_eq!(other.len(), 1);
  assert_eq!(other[0].code, "10");
  assert_eq!(other[0].tenant, TenantId::GLOBAL);
}

#[tokio::test]
async fn list_dicts_filters_by_keyword_and_status() {
  let r = registry().await;
  let t = tenant(1);
  r.submit_dict_event(t, dict_event("org_type", EventType::Created, "2024-01-01", "Org Type", "d1"))
    .await
    .unwrap();
  r.submit_dict_event(t, dict_event("region", EventType::Created, "2024-01-01", "Region", "d2"))
    .await
    .unwrap();
  r.submit_dict_event(t, dict_event("region", EventType::Disabled, "2024-02-01", "", "d3"))
    .await
    .unwrap();

  let mut query = ListQuery::new(day("2024-03-01"));
  query.keyword = Some("ORG".into());
  let rows = r.list_dicts(t, query).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].dict_code, "org_type");

  let mut query = ListQuery::new(day("2024-03-01"));
  query.status = StatusFilter::Active;
  let rows = r.list_dicts(t, query).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].name, "Org Type");
}

#[tokio::test]
async fn list_limits_are_clamped() {
  let r = registry().await;
  let t = tenant(1);
  r.submit_dict_event(t, dict_event("big", EventType::Created, "2024-01-01", "Big", "d1"))
    .await
    .unwrap();
  for i in 0..60 {
    r.submit_value_event(
      t,
      value_event("big", &format!("{i:03}"), EventType::Created, "2024-01-01", "v", &format!("v{i}")),
    )
    .await
    .unwrap();
  }

  let rows = r
    .list_values(t, "big".into(), ListQuery::new(day("2024-02-01")))
    .await
    .unwrap();
  assert_eq!(rows.len(), Limit::DEFAULT);
  assert_eq!(rows[0].code, "000");

  let mut query = ListQuery::new(day("2024-02-01"));
  query.limit = Limit::explicit(999).unwrap();
  query.offset = 5;
  let rows = r.list_values(t, "big".into(), query).await.unwrap();
  assert_eq!(rows.len(), Limit::MAX);
  assert_eq!(rows[0].code, "005");

  let events = r
    .list_events(t, EventFamily::Value, 0, Limit::explicit(999).unwrap())
    .await
    .unwrap();
  assert_eq!(events.len(), Limit::MAX);
  let rest = r
    .list_events(t, EventFamily::Value, events[49].id, Limit::explicit(50).unwrap())
    .await
    .unwrap();
  assert_eq!(rest.len(), 10);
}

#[tokio::test]
async fn list_values_requires_a_dict_code() {
  let r = registry().await;
  let err = r
    .list_values(tenant(1), " ".into(), ListQuery::new(day("2024-01-01")))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn tenant_fallback_is_decided_before_paging() {
  let r = registry().await;
  let t = tenant(1);
  r.submit_dict_event(
    TenantId::GLOBAL,
    dict_event("big", EventType::Created, "2024-01-01", "Big", "d1"),
  )
  .await
  .unwrap();
  for i in 0..31 {
    r.submit_value_event(
      TenantId::GLOBAL,
      value_event("big", &format!("g{i:02}"), EventType::Created, "2024-01-01", "g", &format!("v{i}")),
    )
    .await
    .unwrap();
  }
  r.submit_value_event(t, value_event("big", "own", EventType::Created, "2024-01-01", "t", "v1"))
    .await
    .unwrap();

  let mut query = ListQuery::new(day("2024-02-01"));
  query.offset = 10;
  let page = r.list_values(t, "big".into(), query).await.unwrap();
  assert!(page.is_empty());

  let rows = r
    .list_values(t, "big".into(), ListQuery::new(day("2024-02-01")))
    .await
    .unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].code, "own");

  let mut query = ListQuery::new(day("2024-02-01"));
  query.offset = 30;
  let page = r.list_values(tenant(2), "big".into(), query).await.unwrap();
  assert_eq!(page.len(), 1);
  assert_eq!(page[0].code, "g30");
}

// ─── Rebuild ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rebuild_reproduces_incremental_snapshots() {
  let r = registry().await;
  let t = tenant(1);
  seed_org_type(&r, t).await;
  r.submit_value_event(
    t,
    value_event("org_type", "10", EventType::LabelCorrected, "2024-06-01", "科室", "v2"),
  )
  .await
  .unwrap();
  r.submit_value_event(t, value_event("org_type", "10", EventType::Disabled, "2024-09-01", "", "v3"))
    .await
    .unwrap();

  let mut query = ListQuery::new(day("2024-12-01"));
  query.limit = Limit::defaulted(50);
  let dicts_before = r.list_dicts(t, query.clone()).await.unwrap();
  let values_before = r.list_values(t, "org_type".into(), query.clone()).await.unwrap();

  let summary = r.rebuild_projection(t).await.unwrap();
  assert_eq!(summary.events, 4);
  assert_eq!(summary.dict_rows, 1);
  assert_eq!(summary.value_rows, 2);

  assert_eq!(r.list_dicts(t, query.clone()).await.unwrap(), dicts_before);
  assert_eq!(r.list_values(t, "org_type".into(), query).await.unwrap(), values_before);
}

// ─── Baseline releases ───────────────────────────────────────────────────────

fn publish_request(target: TenantId, as_of: &str) -> PublishRequest {
  PublishRequest {
    baseline:     BaselineRequest::new(target, day(as_of), "rel-1"),
    request_code: "pub-1".into(),
    operator:     operator(),
  }
}

#[tokio::test]
async fn preview_lists_missing_rows() {
  let r = registry().await;
  seed_org_type(&r, TenantId::GLOBAL).await;

  let req = BaselineRequest::new(tenant(1), day("2024-06-01"), "rel-1");
  let report = r.preview_baseline(req.clone()).await.unwrap();
  assert_eq!(report.source_dict_count, 1);
  assert_eq!(report.source_value_count, 1);
  assert_eq!(report.dict_missing_count, 1);
  assert_eq!(report.value_missing_count, 1);
  assert!(report.is_publishable());

  let again = r.preview_baseline(req).await.unwrap();
  assert_eq!(report, again);
}

#[tokio::test]
async fn preview_rejects_same_tenant() {
  let r = registry().await;
  let req = BaselineRequest::new(TenantId::GLOBAL, day("2024-06-01"), "rel-1");
  let err = r.preview_baseline(req).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn publish_replays_source_into_target() {
  let r = registry().await;
  let target = tenant(1);
  seed_org_type(&r, TenantId::GLOBAL).await;

  let result = r
    .publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap();
  assert_eq!(result.status, ReleaseStatus::Succeeded);
  assert_eq!(result.dict_events_applied, 1);
  assert_eq!(result.value_events_applied, 1);
  assert_eq!(result.dict_events_retried + result.value_events_retried, 0);

  let events = r
    .list_events(target, EventFamily::Value, 0, Limit::default())
    .await
    .unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].request_code, "pub-1#value#2");
  assert_eq!(events[0].payload["release"]["release_id"], "rel-1");
  assert_eq!(events[0].payload["label"], "部门");

  let report = r
    .preview_baseline(BaselineRequest::new(target, day("2024-06-01"), "rel-1"))
    .await
    .unwrap();
  assert_eq!(report.conflict_count, 0);

  let stored = r.get_release(target, "rel-1".into()).await.unwrap().unwrap();
  assert_eq!(stored.status, ReleaseStatus::Succeeded);
  assert_eq!(stored.value_events_total, 1);
  assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn republishing_is_a_retry_of_every_event() {
  let r = registry().await;
  let target = tenant(1);
  seed_org_type(&r, TenantId::GLOBAL).await;

  let first = r
    .publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap();
  let second = r
    .publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap();

  assert_eq!(second.dict_events_total, first.dict_events_total);
  assert_eq!(second.value_events_total, first.value_events_total);
  assert_eq!(second.dict_events_applied + second.value_events_applied, 0);
  assert_eq!(second.dict_events_retried, 1);
  assert_eq!(second.value_events_retried, 1);

  let events = r
    .list_events(target, EventFamily::Dict, 0, Limit::default())
    .await
    .unwrap();
  assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn publish_only_takes_events_up_to_as_of() {
  let r = registry().await;
  let target = tenant(1);
  seed_org_type(&r, TenantId::GLOBAL).await;
  r.submit_value_event(
    TenantId::GLOBAL,
    value_event("org_type", "20", EventType::Created, "2024-09-01", "单位", "v2"),
  )
  .await
  .unwrap();

  let result = r
    .publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap();
  assert_eq!(result.value_events_total, 1);
}

#[tokio::test]
async fn publish_without_source_events_is_not_ready() {
  let r = registry().await;
  let target = tenant(1);

  let err = r
    .publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::BaselineNotReady);
  assert!(r.get_release(target, "rel-1".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_publish_rolls_back_and_is_recorded() {
  let r = registry().await;
  let target = tenant(1);
  seed_org_type(&r, TenantId::GLOBAL).await;
  r.submit_dict_event(
    target,
    dict_event("org_type", EventType::Created, "2024-03-01", "Local", "local-d1"),
  )
  .await
  .unwrap();

  let err = r
    .publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);

  let values = r
    .list_events(target, EventFamily::Value, 0, Limit::default())
    .await
    .unwrap();
  assert!(values.is_empty());

  let stored = r.get_release(target, "rel-1".into()).await.unwrap().unwrap();
  assert_eq!(stored.status, ReleaseStatus::Failed);
  assert!(stored.error.is_some());
}

#[tokio::test]
async fn failed_publish_keeps_an_earlier_success() {
  let r = registry().await;
  let target = tenant(1);
  seed_org_type(&r, TenantId::GLOBAL).await;
  r.publish_baseline(publish_request(target, "2024-06-01"))
    .await
    .unwrap();

  let mut again = publish_request(target, "2024-06-01");
  again.request_code = "pub-2".into();
  r.publish_baseline(again).await.unwrap_err();

  let stored = r.get_release(target, "rel-1".into()).await.unwrap().unwrap();
  assert_eq!(stored.status, ReleaseStatus::Succeeded);
  assert_eq!(stored.request_code, "pub-1");
  assert!(stored.error.is_none());
}
