//! [`SqliteStore`]: the SQLite implementation of [`MergeLedger`] and
//! [`ConfigStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use dedup_core::{
  config::DeduplicationConfig,
  operation::{
    MergeOperation, NewMergeOperation, NewUserDiff, OperationPage,
    OperationQuery, OperationStatus, UserDiff,
  },
  store::{ConfigStore, MergeLedger},
};

use crate::{
  encode::{
    OPERATION_COLUMNS, RawConfig, RawOperation, RawUserDiff, decode_dt,
    encode_diff, encode_dt, encode_ids, encode_record, now,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A merge ledger and configuration store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

/// A `user_diffs` row ready for insertion, minus the operation id.
struct EncodedDiff {
  user_id:       String,
  channel_name:  String,
  original_data: String,
  merged_data:   String,
  diff_data:     String,
}

impl EncodedDiff {
  fn encode(diff: &NewUserDiff) -> Result<Self> {
    Ok(Self {
      user_id:       diff.user_id.clone(),
      channel_name:  diff.channel_name.clone(),
      original_data: encode_record(&diff.original_data)?,
      merged_data:   encode_record(&diff.merged_data)?,
      diff_data:     encode_diff(&diff.diff_data)?,
    })
  }
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, as used by the tests.
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
}

// ─── MergeLedger impl ────────────────────────────────────────────────────────

impl MergeLedger for SqliteStore {
  type Error = Error;

  async fn record(
    &self,
    operation: NewMergeOperation,
    diffs: Vec<NewUserDiff>,
  ) -> Result<MergeOperation> {
    let created_at = now()?;

    let created_str  = encode_dt(created_at);
    let primary      = operation.primary_user_id.clone();
    let ids_str      = encode_ids(&operation.merged_user_ids)?;
    let strategy_str = operation.merge_strategy.as_str();
    let preserve     = operation.preserve_channels;
    let key          = operation.idempotency_key.clone();
    let rows         = diffs
      .iter()
      .map(EncodedDiff::encode)
      .collect::<Result<Vec<_>>>()?;

    // One transaction: dropping `tx` on any error rolls back the operation
    // row together with whatever diffs were already inserted.
    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO merge_operations (
             primary_user_id, merged_user_ids, merge_strategy, status,
             preserve_channels, idempotency_key, created_at
           ) VALUES (?1, ?2, ?3, 'completed', ?4, ?5, ?6)",
          rusqlite::params![
            primary,
            ids_str,
            strategy_str,
            preserve,
            key,
            created_str,
          ],
        )?;
        let id = tx.last_insert_rowid();

        {
          let mut stmt = tx.prepare(
            "INSERT INTO user_diffs (
               merge_operation_id, user_id, channel_name,
               original_data, merged_data, diff_data, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for row in &rows {
            stmt.execute(rusqlite::params![
              id,
              row.user_id,
              row.channel_name,
              row.original_data,
              row.merged_data,
              row.diff_data,
              created_str,
            ])?;
          }
        }

        tx.commit()?;
        Ok(id)
      })
      .await?;

    Ok(MergeOperation {
      id,
      primary_user_id: operation.primary_user_id,
      merged_user_ids: operation.merged_user_ids,
      merge_strategy: operation.merge_strategy,
      status: OperationStatus::Completed,
      preserve_channels: operation.preserve_channels,
      idempotency_key: operation.idempotency_key,
      created_at,
    })
  }

  async fn get_operation(&self, id: i64) -> Result<Option<MergeOperation>> {
    let raw: Option<RawOperation> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {OPERATION_COLUMNS} FROM merge_operations WHERE id = ?1"),
            rusqlite::params![id],
            RawOperation::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawOperation::into_operation).transpose()
  }

  async fn find_by_idempotency_key(
    &self,
    key: String,
  ) -> Result<Option<MergeOperation>> {
    let raw: Option<RawOperation> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {OPERATION_COLUMNS} FROM merge_operations WHERE idempotency_key = ?1"
            ),
            rusqlite::params![key],
            RawOperation::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawOperation::into_operation).transpose()
  }

  async fn get_diffs(&self, operation_id: i64) -> Result<Vec<UserDiff>> {
    let raws: Vec<RawUserDiff> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, merge_operation_id, user_id, channel_name,
                  original_data, merged_data, diff_data, created_at
           FROM user_diffs
           WHERE merge_operation_id = ?1
           ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![operation_id], |row| {
            Ok(RawUserDiff {
              id:                 row.get(0)?,
              merge_operation_id: row.get(1)?,
              user_id:            row.get(2)?,
              channel_name:       row.get(3)?,
              original_data:      row.get(4)?,
              merged_data:        row.get(5)?,
              diff_data:          row.get(6)?,
              created_at:         row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUserDiff::into_user_diff).collect()
  }

  async fn list_operations(&self, query: OperationQuery) -> Result<OperationPage> {
    let status_str = query.status.map(OperationStatus::as_str);
    let after_str  = query.created_after.map(encode_dt);
    let before_str = query.created_before.map(encode_dt);
    let limit_val  = i64::from(query.limit);
    let offset_val = i64::try_from(query.offset()).unwrap_or(i64::MAX);

    let (raws, total): (Vec<RawOperation>, i64) = self
      .conn
      .call(move |conn| {
        // NULL parameters disable their filter.
        const FILTER: &str = "(?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR created_at >= ?2)
           AND (?3 IS NULL OR created_at <= ?3)";

        let total: i64 = conn.query_row(
          &format!("SELECT COUNT(*) FROM merge_operations WHERE {FILTER}"),
          rusqlite::params![status_str, after_str, before_str],
          |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
          "SELECT {OPERATION_COLUMNS} FROM merge_operations
           WHERE {FILTER}
           ORDER BY created_at DESC, id DESC
           LIMIT ?4 OFFSET ?5"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              status_str,
              after_str,
              before_str,
              limit_val,
              offset_val,
            ],
            RawOperation::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((rows, total))
      })
      .await?;

    Ok(OperationPage {
      operations: raws
        .into_iter()
        .map(RawOperation::into_operation)
        .collect::<Result<_>>()?,
      page:       query.page,
      limit:      query.limit,
      total:      u64::try_from(total).unwrap_or_default(),
    })
  }

  async fn mark_reverted(&self, id: i64) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE merge_operations SET status = 'reverted'
           WHERE id = ?1 AND status = 'completed'",
          rusqlite::params![id],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }
}

// ─── ConfigStore impl ────────────────────────────────────────────────────────

impl ConfigStore for SqliteStore {
  type Error = Error;

  async fn get_config(&self) -> Result<Option<DeduplicationConfig>> {
    let raw: Option<RawConfig> = self
      .conn
      .call(|conn| {
        Ok(conn
          .query_row(
            "SELECT matching_fields, merge_strategy, auto_merge_enabled,
                    confidence_threshold, webhook_url, updated_at
             FROM deduplication_config WHERE id = 1",
            [],
            |row| {
              Ok(RawConfig {
                matching_fields:      row.get(0)?,
                merge_strategy:       row.get(1)?,
                auto_merge_enabled:   row.get(2)?,
                confidence_threshold: row.get(3)?,
                webhook_url:          row.get(4)?,
                updated_at:           row.get(5)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawConfig::into_config).transpose()
  }

  async fn put_config(
    &self,
    config: DeduplicationConfig,
  ) -> Result<DeduplicationConfig> {
    let updated_str  = encode_dt(config.updated_at.unwrap_or_else(Utc::now));
    let fields_str   = encode_ids(&config.matching_fields)?;
    let strategy_str = config.merge_strategy.as_str();
    let auto         = config.auto_merge_enabled;
    let threshold    = config.confidence_threshold;
    let webhook      = config.webhook_url.clone();
    let updated_at   = decode_dt(&updated_str)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO deduplication_config (
             id, matching_fields, merge_strategy, auto_merge_enabled,
             confidence_threshold, webhook_url, updated_at
           ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(id) DO UPDATE SET
             matching_fields      = excluded.matching_fields,
             merge_strategy       = excluded.merge_strategy,
             auto_merge_enabled   = excluded.auto_merge_enabled,
             confidence_threshold = excluded.confidence_threshold,
             webhook_url          = excluded.webhook_url,
             updated_at           = excluded.updated_at",
          rusqlite::params![
            fields_str,
            strategy_str,
            auto,
            threshold,
            webhook,
            updated_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(DeduplicationConfig { updated_at: Some(updated_at), ..config })
  }
}
