//! [`SqliteRegistry`], the SQLite implementation of [`DictionaryRegistry`].

use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::TransactionBehavior;
use tracing::warn;

use canon_core::{
  ErrorKind,
  dict::{DictDefinition, DictValueSegment},
  event::{DictEvent, EventFamily, NewDictEvent, NewValueEvent, SubmitOutcome},
  query::{Limit, ListQuery},
  registry::{DictionaryRegistry, RebuildSummary},
  release::{BaselineRequest, PreviewReport, PublishRequest, PublishResult, ReleaseStatus},
  tenant::TenantId,
};

use crate::{Result, gateway, projector, release, schema::SCHEMA, tx::TenantTx};

// ─── Store ───────────────────────────────────────────────────────────────────

/// How a call's transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  /// Deferred; always rolled back.
  Read,
  /// Takes the write lock up front; committed on success.
  Write,
}

/// A registry backed by a single SQLite file.
///
/// Clones share the same background connection.
#[derive(Clone)]
pub struct SqliteRegistry {
  conn: tokio_rusqlite::Connection,
}

impl SqliteRegistry {
  /// Open (or create) a registry at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory registry, used by the tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` in one transaction with `tenant` as the active context.
  ///
  /// Any error drops the transaction, which rolls it back.
  async fn run<T, F>(&self, tenant: TenantId, mode: Mode, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut TenantTx<'_>) -> Result<T> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let behavior = match mode {
          Mode::Read => TransactionBehavior::Deferred,
          Mode::Write => TransactionBehavior::Immediate,
        };
        let tx = conn.transaction_with_behavior(behavior)?;
        let mut scoped = TenantTx::activate(tx, tenant);
        let out = f(&mut scoped);
        Ok(match (out, mode) {
          (Ok(value), Mode::Write) => scoped.commit().map(|()| value),
          (out, _) => out,
        })
      })
      .await?
  }
}

// ─── DictionaryRegistry impl ─────────────────────────────────────────────────

impl DictionaryRegistry for SqliteRegistry {
  type Error = crate::Error;

  // ── Mutation gateway ──────────────────────────────────────────────────────

  async fn submit_dict_event(
    &self,
    tenant: TenantId,
    input: NewDictEvent,
  ) -> Result<SubmitOutcome<DictDefinition>> {
    let m = input.validate()?;
    self
      .run(tenant, Mode::Write, move |tx| gateway::submit_dict(tx, m))
      .await
  }

  async fn submit_value_event(
    &self,
    tenant: TenantId,
    input: NewValueEvent,
  ) -> Result<SubmitOutcome<DictValueSegment>> {
    let m = input.validate()?;
    self
      .run(tenant, Mode::Write, move |tx| gateway::submit_value(tx, m))
      .await
  }

  // ── Temporal reads ────────────────────────────────────────────────────────

  async fn list_dicts(&self, tenant: TenantId, query: ListQuery) -> Result<Vec<DictDefinition>> {
    self
      .run(tenant, Mode::Read, move |tx| projector::list_dicts(tx, &query))
      .await
  }

  async fn list_values(
    &self,
    tenant: TenantId,
    dict_code: String,
    query: ListQuery,
  ) -> Result<Vec<DictValueSegment>> {
    self
      .run(tenant, Mode::Read, move |tx| {
        projector::list_values(tx, &dict_code, &query)
      })
      .await
  }

  async fn resolve_label(
    &self,
    tenant: TenantId,
    as_of: NaiveDate,
    dict_code: String,
    code: String,
  ) -> Result<Option<String>> {
    self
      .run(tenant, Mode::Read, move |tx| {
        projector::resolve_label(tx, as_of, &dict_code, &code)
      })
      .await
  }

  // ── Event log ─────────────────────────────────────────────────────────────

  async fn list_events(
    &self,
    tenant: TenantId,
    family: EventFamily,
    after_id: i64,
    limit: Limit,
  ) -> Result<Vec<DictEvent>> {
    self
      .run(tenant, Mode::Read, move |tx| {
        tx.events(Some(family), after_id, None, Some(limit.get()))
      })
      .await
  }

  async fn rebuild_projection(&self, tenant: TenantId) -> Result<RebuildSummary> {
    self.run(tenant, Mode::Write, projector::rebuild).await
  }

  // ── Baseline releases ─────────────────────────────────────────────────────

  async fn preview_baseline(&self, req: BaselineRequest) -> Result<PreviewReport> {
    req.validate()?;
    self
      .run(req.source_tenant, Mode::Read, move |tx| release::preview(tx, &req))
      .await
  }

  async fn publish_baseline(&self, req: PublishRequest) -> Result<PublishResult> {
    req.validate()?;
    let started_at = Utc::now();
    let source = req.baseline.source_tenant;
    let attempt = req.clone();
    let outcome = self
      .run(source, Mode::Write, move |tx| release::publish(tx, &attempt))
      .await;

    let err = match outcome {
      Ok(result) => return Ok(result),
      Err(err) => err,
    };
    if err.kind() == ErrorKind::BaselineNotReady {
      return Err(err);
    }

    warn!(
      release_id = %req.baseline.release_id,
      target = %req.baseline.target_tenant,
      error = %err,
      "baseline publish failed"
    );
    let mut failed = PublishResult::start(&req, started_at);
    failed.finish(ReleaseStatus::Failed, Utc::now(), Some(err.to_string()));
    let target = req.baseline.target_tenant;
    if let Err(record_err) = self
      .run(target, Mode::Write, move |tx| tx.save_release(&failed))
      .await
    {
      warn!(error = %record_err, "could not record failed release");
    }
    Err(err)
  }

  async fn get_release(
    &self,
    target_tenant: TenantId,
    release_id: String,
  ) -> Result<Option<PublishResult>> {
    self
      .run(target_tenant, Mode::Read, move |tx| tx.release(&release_id))
      .await
  }
}
