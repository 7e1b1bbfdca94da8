//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds,
//! `Z` suffix) so lexical order is chronological order. Structured fields are
//! stored as compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use dedup_core::{
  config::DeduplicationConfig,
  diff::Diff,
  merge::MergeStrategy,
  operation::{MergeOperation, OperationStatus, UserDiff},
  profile::Record,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// Now, truncated to the precision the database keeps.
pub fn now() -> Result<DateTime<Utc>> { decode_dt(&encode_dt(Utc::now())) }

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_strategy(s: &str) -> Result<MergeStrategy> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown merge strategy: {s:?}")))
}

pub fn decode_status(s: &str) -> Result<OperationStatus> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown operation status: {s:?}")))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_ids(ids: &[String]) -> Result<String> {
  Ok(serde_json::to_string(ids)?)
}

pub fn decode_ids(s: &str) -> Result<Vec<String>> {
  Ok(serde_json::from_str(s)?)
}

pub fn encode_record(record: &Record) -> Result<String> {
  Ok(serde_json::to_string(record)?)
}

pub fn decode_record(s: &str) -> Result<Record> {
  Ok(serde_json::from_str(s)?)
}

pub fn encode_diff(diff: &Diff) -> Result<String> {
  Ok(serde_json::to_string(diff)?)
}

pub fn decode_diff(s: &str) -> Result<Diff> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const OPERATION_COLUMNS: &str = "id, primary_user_id, merged_user_ids, \
   merge_strategy, status, preserve_channels, idempotency_key, created_at";

/// Raw values read directly from a `merge_operations` row.
pub struct RawOperation {
  pub id:                i64,
  pub primary_user_id:   String,
  pub merged_user_ids:   String,
  pub merge_strategy:    String,
  pub status:            String,
  pub preserve_channels: bool,
  pub idempotency_key:   Option<String>,
  pub created_at:        String,
}

impl RawOperation {
  /// Read a row selected with [`OPERATION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      primary_user_id:   row.get(1)?,
      merged_user_ids:   row.get(2)?,
      merge_strategy:    row.get(3)?,
      status:            row.get(4)?,
      preserve_channels: row.get(5)?,
      idempotency_key:   row.get(6)?,
      created_at:        row.get(7)?,
    })
  }

  pub fn into_operation(self) -> Result<MergeOperation> {
    Ok(MergeOperation {
      id:                self.id,
      primary_user_id:   self.primary_user_id,
      merged_user_ids:   decode_ids(&self.merged_user_ids)?,
      merge_strategy:    decode_strategy(&self.merge_strategy)?,
      status:            decode_status(&self.status)?,
      preserve_channels: self.preserve_channels,
      idempotency_key:   self.idempotency_key,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `user_diffs` row.
pub struct RawUserDiff {
  pub id:                 i64,
  pub merge_operation_id: i64,
  pub user_id:            String,
  pub channel_name:       String,
  pub original_data:      String,
  pub merged_data:        String,
  pub diff_data:          String,
  pub created_at:         String,
}

impl RawUserDiff {
  pub fn into_user_diff(self) -> Result<UserDiff> {
    Ok(UserDiff {
      id:                 self.id,
      merge_operation_id: self.merge_operation_id,
      user_id:            self.user_id,
      channel_name:       self.channel_name,
      original_data:      decode_record(&self.original_data)?,
      merged_data:        decode_record(&self.merged_data)?,
      diff_data:          decode_diff(&self.diff_data)?,
      created_at:         decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from the `deduplication_config` row.
pub struct RawConfig {
  pub matching_fields:      String,
  pub merge_strategy:       String,
  pub auto_merge_enabled:   bool,
  pub confidence_threshold: f64,
  pub webhook_url:          Option<String>,
  pub updated_at:           String,
}

impl RawConfig {
  pub fn into_config(self) -> Result<DeduplicationConfig> {
    Ok(DeduplicationConfig {
      matching_fields:      decode_ids(&self.matching_fields)?,
      merge_strategy:       decode_strategy(&self.merge_strategy)?,
      auto_merge_enabled:   self.auto_merge_enabled,
      confidence_threshold: self.confidence_threshold,
      webhook_url:          self.webhook_url,
      updated_at:           Some(decode_dt(&self.updated_at)?),
    })
  }
}
