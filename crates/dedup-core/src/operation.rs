//! Ledger records: merge operations and the per-profile diffs that make them
//! reversible.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  diff::Diff,
  merge::MergeStrategy,
  profile::Record,
};

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle of a merge operation. The only transition after creation is
/// `Completed → Reverted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
  Completed,
  Failed,
  Reverted,
}

impl OperationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Reverted => "reverted",
    }
  }

  pub fn can_unmerge(self) -> bool { matches!(self, Self::Completed) }
}

impl fmt::Display for OperationStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OperationStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      "reverted" => Ok(Self::Reverted),
      other => Err(Error::Validation(format!(
        "unknown operation status: {other:?}"
      ))),
    }
  }
}

// ─── MergeOperation ──────────────────────────────────────────────────────────

/// A persisted merge. Never deleted; only its status ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOperation {
  pub id:                i64,
  pub primary_user_id:   String,
  /// Absorbed profile ids in request order, without repeats.
  pub merged_user_ids:   Vec<String>,
  pub merge_strategy:    MergeStrategy,
  pub status:            OperationStatus,
  /// Whether the provenance history was attached to the live primary.
  pub preserve_channels: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub idempotency_key:   Option<String>,
  pub created_at:        DateTime<Utc>,
}

/// Input to [`crate::store::MergeLedger::record`]. The id, status and
/// creation time are assigned by the ledger.
#[derive(Debug, Clone)]
pub struct NewMergeOperation {
  pub primary_user_id:   String,
  pub merged_user_ids:   Vec<String>,
  pub merge_strategy:    MergeStrategy,
  pub preserve_channels: bool,
  pub idempotency_key:   Option<String>,
}

// ─── UserDiff ────────────────────────────────────────────────────────────────

/// Everything needed to restore one absorbed profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDiff {
  pub id:                 i64,
  pub merge_operation_id: i64,
  pub user_id:            String,
  pub channel_name:       String,
  /// Full pre-merge snapshot of the absorbed profile. Unmerge pushes this
  /// back verbatim.
  pub original_data:      Record,
  /// The canonical record at merge time.
  pub merged_data:        Record,
  pub diff_data:          Diff,
  pub created_at:         DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUserDiff {
  pub user_id:       String,
  pub channel_name:  String,
  pub original_data: Record,
  pub merged_data:   Record,
  pub diff_data:     Diff,
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// Parameters for [`crate::store::MergeLedger::list_operations`].
#[derive(Debug, Clone)]
pub struct OperationQuery {
  /// 1-based page number.
  pub page:           u32,
  pub limit:          u32,
  pub status:         Option<OperationStatus>,
  pub created_after:  Option<DateTime<Utc>>,
  pub created_before: Option<DateTime<Utc>>,
}

impl Default for OperationQuery {
  fn default() -> Self {
    Self {
      page:           1,
      limit:          20,
      status:         None,
      created_after:  None,
      created_before: None,
    }
  }
}

impl OperationQuery {
  pub fn offset(&self) -> u64 {
    u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
  }
}

/// One page of operations, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct OperationPage {
  pub operations: Vec<MergeOperation>,
  pub page:       u32,
  pub limit:      u32,
  /// Number of operations matching the filters across all pages.
  pub total:      u64,
}
