//! Error types for `dedup-core`.
//!
//! Every failure surfaced by the engine falls into one of the five
//! [`ErrorKind`]s. Collaborator errors (remote profile store, ledger) are
//! boxed so callers can inspect the source chain without the core depending
//! on any backend.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The coarse classification callers use to decide on a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  NotFound,
  Conflict,
  Upstream,
  Persistence,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid request: {0}")]
  Validation(String),

  #[error("profile not found: {0}")]
  ProfileNotFound(String),

  #[error("merge operation not found: {0}")]
  OperationNotFound(i64),

  #[error("merge operation {0} is already reverted")]
  AlreadyReverted(i64),

  #[error("merge operation {id} is {status}, expected completed")]
  NotCompleted { id: i64, status: String },

  #[error(
    "idempotency key {key:?} was used by merge operation {operation_id} for different profiles"
  )]
  IdempotencyMismatch { key: String, operation_id: i64 },

  #[error("profile store {operation} failed: {source}")]
  Upstream {
    operation: &'static str,
    #[source]
    source:    BoxError,
  },

  #[error("profile store {operation} timed out after {after:?}")]
  UpstreamTimeout {
    operation: &'static str,
    after:     Duration,
  },

  #[error("ledger {operation} failed: {source}")]
  Persistence {
    operation: &'static str,
    #[source]
    source:    BoxError,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) | Self::Serialization(_) => ErrorKind::Validation,
      Self::ProfileNotFound(_) | Self::OperationNotFound(_) => {
        ErrorKind::NotFound
      }
      Self::AlreadyReverted(_)
      | Self::NotCompleted { .. }
      | Self::IdempotencyMismatch { .. } => ErrorKind::Conflict,
      Self::Upstream { .. } | Self::UpstreamTimeout { .. } => {
        ErrorKind::Upstream
      }
      Self::Persistence { .. } => ErrorKind::Persistence,
    }
  }

  /// Wrap a remote profile store error.
  pub fn upstream<E>(operation: &'static str, source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Upstream { operation, source: Box::new(source) }
  }

  /// Wrap a ledger or configuration store error.
  pub fn persistence<E>(operation: &'static str, source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Persistence { operation, source: Box::new(source) }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
