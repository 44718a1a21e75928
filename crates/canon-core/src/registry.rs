//! The `DictionaryRegistry` trait.
//!
//! Implemented by storage backends (e.g. `canon-store-sqlite`). Every method
//! runs inside exactly one transaction bound to one tenant context; nothing is
//! cached between calls.

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
  dict::{DictDefinition, DictValueSegment},
  event::{DictEvent, EventFamily, NewDictEvent, NewValueEvent, SubmitOutcome},
  query::{Limit, ListQuery},
  release::{BaselineRequest, PreviewReport, PublishRequest, PublishResult},
  tenant::TenantId,
};

/// Row counts written by [`DictionaryRegistry::rebuild_projection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSummary {
  pub events:     usize,
  pub dict_rows:  usize,
  pub value_rows: usize,
}

/// Abstraction over a registry backend.
///
/// Event writes are append-only and idempotent per (tenant, family,
/// request_code). Reads on dictionaries and values fall back to the global
/// tenant when the tenant-scoped result is empty.
pub trait DictionaryRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Mutation gateway ──────────────────────────────────────────────────

  /// Record a dictionary definition event and return the resulting window.
  fn submit_dict_event(
    &self,
    tenant: TenantId,
    input: NewDictEvent,
  ) -> impl Future<Output = Result<SubmitOutcome<DictDefinition>, Self::Error>> + Send + '_;

  /// Record a dictionary value event and return the resulting window.
  ///
  /// Fails with a not-found error unless the dictionary is active on the
  /// event's effective day for the tenant (or, failing that, globally).
  fn submit_value_event(
    &self,
    tenant: TenantId,
    input: NewValueEvent,
  ) -> impl Future<Output = Result<SubmitOutcome<DictValueSegment>, Self::Error>> + Send + '_;

  // ── Temporal reads ────────────────────────────────────────────────────

  fn list_dicts(
    &self,
    tenant: TenantId,
    query: ListQuery,
  ) -> impl Future<Output = Result<Vec<DictDefinition>, Self::Error>> + Send + '_;

  fn list_values(
    &self,
    tenant: TenantId,
    dict_code: String,
    query: ListQuery,
  ) -> impl Future<Output = Result<Vec<DictValueSegment>, Self::Error>> + Send + '_;

  /// The label applicable on `as_of`, or `None` when no window qualifies in
  /// the tenant or the global baseline.
  fn resolve_label(
    &self,
    tenant: TenantId,
    as_of: NaiveDate,
    dict_code: String,
    code: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  // ── Event log ─────────────────────────────────────────────────────────

  /// Events of one family with `id > after_id`, in id order.
  fn list_events(
    &self,
    tenant: TenantId,
    family: EventFamily,
    after_id: i64,
    limit: Limit,
  ) -> impl Future<Output = Result<Vec<DictEvent>, Self::Error>> + Send + '_;

  /// Drop and re-derive the tenant's snapshot rows from its events.
  fn rebuild_projection(
    &self,
    tenant: TenantId,
  ) -> impl Future<Output = Result<RebuildSummary, Self::Error>> + Send + '_;

  // ── Baseline releases ─────────────────────────────────────────────────

  /// Read-only diff of the source dataset against the target.
  fn preview_baseline(
    &self,
    req: BaselineRequest,
  ) -> impl Future<Output = Result<PreviewReport, Self::Error>> + Send + '_;

  /// Replay the source history into the target, all or nothing.
  fn publish_baseline(
    &self,
    req: PublishRequest,
  ) -> impl Future<Output = Result<PublishResult, Self::Error>> + Send + '_;

  fn get_release(
    &self,
    target_tenant: TenantId,
    release_id: String,
  ) -> impl Future<Output = Result<Option<PublishResult>, Self::Error>> + Send + '_;
}
