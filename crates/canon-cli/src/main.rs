//! `canon`: operator CLI for the Canon dictionary registry.
//!
//! Reads `canon.toml` (or the path given with `--config`) layered with
//! `CANON_*` environment variables, opens the SQLite store and runs one
//! registry operation. Results are printed as JSON.
//!
//! # Usage
//!
//! ```
//! canon submit-dict org_type created 2024-01-01 --name "Org Type" --request-code d1
//! canon submit-value org_type 10 created 2024-01-01 --label 部门 --request-code v1
//! canon preview --target 6f1c… --as-of 2024-06-01 --release-id rel-1
//! canon publish --target 6f1c… --as-of 2024-06-01 --release-id rel-1 --request-code pub-1
//! ```

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
};

use anyhow::{Context as _, bail};
use canon_core::{
  ErrorKind,
  event::{EventFamily, EventType, NewDictEvent, NewValueEvent},
  query::{Limit, ListQuery, StatusFilter},
  registry::DictionaryRegistry,
  release::{BaselineRequest, PublishRequest},
  tenant::TenantId,
};
use canon_store_sqlite::SqliteRegistry;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "canon", version, about = "Operator CLI for the Canon dictionary registry")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "canon.toml")]
  config: PathBuf,

  /// SQLite database file; overrides `store_path` from the config.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args, Debug)]
struct TenantArg {
  /// Tenant UUID; defaults to the global tenant.
  #[arg(long, short)]
  tenant: Option<TenantId>,
}

impl TenantArg {
  fn get(&self) -> TenantId { self.tenant.unwrap_or(TenantId::GLOBAL) }
}

#[derive(Args, Debug)]
struct MutationArgs {
  /// `created`, `label_corrected` or `disabled`.
  event_type:    EventType,
  /// `YYYY-MM-DD`.
  effective_day: String,

  /// Extra payload as a JSON object.
  #[arg(long)]
  payload:      Option<String>,
  #[arg(long)]
  request_code: String,
  /// Initiator UUID; defaults to `default_operator` from the config.
  #[arg(long)]
  operator:     Option<Uuid>,
}

#[derive(Args, Debug)]
struct ListArgs {
  /// Day the status filter is evaluated on; defaults to today (UTC).
  #[arg(long)]
  as_of:   Option<NaiveDate>,
  #[arg(long)]
  keyword: Option<String>,
  /// `all`, `active` or `inactive`.
  #[arg(long, default_value = "all")]
  status:  String,
  #[arg(long)]
  limit:   Option<String>,
  #[arg(long, default_value_t = 0)]
  offset:  usize,
}

impl ListArgs {
  fn query(self) -> anyhow::Result<ListQuery> {
    let mut query = ListQuery::new(self.as_of.unwrap_or_else(|| Utc::now().date_naive()));
    query.keyword = self.keyword;
    query.status = StatusFilter::parse(&self.status)?;
    query.limit = parse_limit(self.limit.as_deref())?;
    query.offset = self.offset;
    Ok(query)
  }
}

#[derive(Args, Debug)]
struct BaselineArgs {
  /// Tenant whose history is released; defaults to the global tenant.
  #[arg(long)]
  source:        Option<TenantId>,
  #[arg(long)]
  target:        TenantId,
  #[arg(long)]
  as_of:         NaiveDate,
  #[arg(long)]
  release_id:    String,
  #[arg(long, default_value_t = BaselineRequest::DEFAULT_MAX_CONFLICTS)]
  max_conflicts: usize,
}

impl BaselineArgs {
  fn request(self) -> BaselineRequest {
    let mut req = BaselineRequest::new(self.target, self.as_of, self.release_id);
    req.source_tenant = self.source.unwrap_or(TenantId::GLOBAL);
    req.max_conflicts = self.max_conflicts;
    req
  }
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Record a dictionary definition event.
  SubmitDict {
    #[command(flatten)]
    tenant:    TenantArg,
    dict_code: String,
    #[command(flatten)]
    mutation:  MutationArgs,
    /// Dictionary name, required for `created` and `label_corrected`.
    #[arg(long)]
    name:      Option<String>,
  },
  /// Record a dictionary value event.
  SubmitValue {
    #[command(flatten)]
    tenant:    TenantArg,
    dict_code: String,
    code:      String,
    #[command(flatten)]
    mutation:  MutationArgs,
    /// Value label, required for `created` and `label_corrected`.
    #[arg(long)]
    label:     Option<String>,
  },
  /// List dictionary definitions.
  Dicts {
    #[command(flatten)]
    tenant: TenantArg,
    #[command(flatten)]
    list:   ListArgs,
  },
  /// List the values of one dictionary.
  Values {
    #[command(flatten)]
    tenant:    TenantArg,
    dict_code: String,
    #[command(flatten)]
    list:      ListArgs,
  },
  /// Resolve the label of a value on a day.
  Label {
    #[command(flatten)]
    tenant:    TenantArg,
    dict_code: String,
    code:      String,
    #[arg(long)]
    as_of:     Option<NaiveDate>,
  },
  /// Page through the event log of one family.
  Events {
    #[command(flatten)]
    tenant:   TenantArg,
    /// `dict` or `value`.
    family:   EventFamily,
    #[arg(long, default_value_t = 0)]
    after_id: i64,
    #[arg(long)]
    limit:    Option<String>,
  },
  /// Re-derive a tenant's snapshots from its events.
  Rebuild {
    #[command(flatten)]
    tenant: TenantArg,
  },
  /// Compare a source tenant with a target tenant.
  Preview {
    #[command(flatten)]
    baseline: BaselineArgs,
  },
  /// Replay a source tenant's history into a target tenant.
  Publish {
    #[command(flatten)]
    baseline:     BaselineArgs,
    #[arg(long)]
    request_code: String,
    #[arg(long)]
    operator:     Option<Uuid>,
    /// Publish even when the preview reports mismatches.
    #[arg(long)]
    force:        bool,
  },
  /// Show a recorded release.
  Release {
    #[command(flatten)]
    tenant:     TenantArg,
    release_id: String,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct CliConfig {
  #[serde(default = "default_store_path")]
  store_path:       PathBuf,
  #[serde(default)]
  default_operator: Option<Uuid>,
}

fn default_store_path() -> PathBuf { PathBuf::from("canon.db") }

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  match run(Cli::parse()).await {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error [{}]: {err:#}", error_kind(&err));
      ExitCode::FAILURE
    }
  }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("CANON"))
    .build()
    .context("failed to read config file")?;
  let cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  let store_path = expand_tilde(cli.store.as_deref().unwrap_or(cfg.store_path.as_path()));
  let registry = SqliteRegistry::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  tracing::debug!(path = %store_path.display(), "store opened");

  let operator = |explicit: Option<Uuid>| {
    explicit
      .or(cfg.default_operator)
      .context("no --operator given and no default_operator configured")
  };

  let printed = match cli.command {
    Command::SubmitDict { tenant, dict_code, mutation, name } => {
      let input = NewDictEvent {
        dict_code,
        event_type: mutation.event_type,
        effective_day: mutation.effective_day,
        payload: build_payload(mutation.payload.as_deref(), "name", name)?,
        request_code: mutation.request_code,
        initiator: operator(mutation.operator)?,
      };
      print(&registry.submit_dict_event(tenant.get(), input).await?)
    }
    Command::SubmitValue { tenant, dict_code, code, mutation, label } => {
      let input = NewValueEvent {
        dict_code,
        code,
        event_type: mutation.event_type,
        effective_day: mutation.effective_day,
        payload: build_payload(mutation.payload.as_deref(), "label", label)?,
        request_code: mutation.request_code,
        initiator: operator(mutation.operator)?,
      };
      print(&registry.submit_value_event(tenant.get(), input).await?)
    }
    Command::Dicts { tenant, list } => {
      print(&registry.list_dicts(tenant.get(), list.query()?).await?)
    }
    Command::Values { tenant, dict_code, list } => {
      print(&registry.list_values(tenant.get(), dict_code, list.query()?).await?)
    }
    Command::Label { tenant, dict_code, code, as_of } => {
      let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
      let label = registry
        .resolve_label(tenant.get(), as_of, dict_code, code)
        .await?;
      print(&json!({ "found": label.is_some(), "label": label }))
    }
    Command::Events { tenant, family, after_id, limit } => {
      let limit = parse_limit(limit.as_deref())?;
      print(&registry.list_events(tenant.get(), family, after_id, limit).await?)
    }
    Command::Rebuild { tenant } => print(&registry.rebuild_projection(tenant.get()).await?),
    Command::Preview { baseline } => {
      print(&registry.preview_baseline(baseline.request()).await?)
    }
    Command::Publish { baseline, request_code, operator: op, force } => {
      let req = PublishRequest {
        baseline: baseline.request(),
        request_code,
        operator: operator(op)?,
      };
      let report = registry.preview_baseline(req.baseline.clone()).await?;
      if !report.is_publishable() && !force {
        print(&report)?;
        tracing::warn!(
          dict_name_mismatches = report.dict_name_mismatch_count,
          value_label_mismatches = report.value_label_mismatch_count,
          "target contradicts the baseline; rerun with --force to publish anyway"
        );
        return Ok(ExitCode::FAILURE);
      }
      print(&registry.publish_baseline(req).await?)
    }
    Command::Release { tenant, release_id } => {
      print(&registry.get_release(tenant.get(), release_id).await?)
    }
  };
  printed?;
  Ok(ExitCode::SUCCESS)
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn parse_limit(raw: Option<&str>) -> anyhow::Result<Limit> {
  Ok(raw.map(Limit::parse).transpose()?.unwrap_or_default())
}

/// Merge `--payload` with the text flag into one JSON object.
fn build_payload(raw: Option<&str>, field: &str, text: Option<String>) -> anyhow::Result<Value> {
  let mut payload = match raw {
    Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON")?,
    None => Value::Object(Default::default()),
  };
  if let Some(text) = text {
    let Some(object) = payload.as_object_mut() else {
      bail!("--payload must be a JSON object");
    };
    object.insert(field.to_owned(), Value::String(text));
  }
  Ok(payload)
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// The registry error kind behind `err`, or `internal` for anything else.
fn error_kind(err: &anyhow::Error) -> ErrorKind {
  if let Some(e) = err.downcast_ref::<canon_store_sqlite::Error>() {
    e.kind()
  } else if let Some(e) = err.downcast_ref::<canon_core::Error>() {
    e.kind()
  } else {
    ErrorKind::Internal
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
