//! Error types for `canon-core`.

use chrono::NaiveDate;
use thiserror::Error;

use crate::tenant::TenantId;

/// Coarse classification used by adapters to decide how to surface an error
/// (and whether retrying the whole call is meaningful).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  /// Blank or malformed input. Never retried.
  Validation,
  /// Dictionary or value absent or inactive after the full fallback chain.
  NotFound,
  /// The request contradicts recorded history; the caller decides.
  Conflict,
  /// Connection or transaction failure. Safe to retry the whole call.
  Transient,
  /// A publish found nothing to release.
  BaselineNotReady,
  /// Persisted data could not be decoded.
  Internal,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("dictionary {dict_code:?} not found")]
  DictNotFound { dict_code: String },

  #[error("dictionary {dict_code:?} is not active on {day}")]
  DictDisabled { dict_code: String, day: NaiveDate },

  #[error("value {dict_code:?}/{code:?} not found")]
  ValueNotFound { dict_code: String, code: String },

  #[error("{key} already has an open validity window")]
  AlreadyExists { key: String },

  #[error("{key} is already disabled")]
  AlreadyDisabled { key: String },

  #[error("{key}: effective day {attempted} must be after {last}")]
  OutOfOrder {
    key:       String,
    last:      NaiveDate,
    attempted: NaiveDate,
  },

  #[error("request code {request_code:?} was already used with a different intent")]
  RetryMismatch { request_code: String },

  #[error("payload invalid: {0}")]
  PayloadInvalid(String),

  #[error("no source events in tenant {source_tenant} on or before {as_of}")]
  BaselineNotReady {
    source_tenant: TenantId,
    as_of:         NaiveDate,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::DictNotFound { .. }
      | Self::DictDisabled { .. }
      | Self::ValueNotFound { .. } => ErrorKind::NotFound,
      Self::AlreadyExists { .. }
      | Self::AlreadyDisabled { .. }
      | Self::OutOfOrder { .. }
      | Self::RetryMismatch { .. }
      | Self::PayloadInvalid(_) => ErrorKind::Conflict,
      Self::BaselineNotReady { .. } => ErrorKind::BaselineNotReady,
      Self::Serialization(_) => ErrorKind::Internal,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
