//! Merging duplicates into a primary, and reapplying recorded merges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dedup_core::{
  diff::{DeduplicationHistory, Diff, MergedUserEntry, diff},
  merge::{self as resolver, MergeStrategy},
  operation::{MergeOperation, NewMergeOperation, NewUserDiff, OperationStatus},
  profile::{HISTORY_ATTRIBUTE, Profile, Record},
  remote::{ProfileFilter, ProfileStore},
  store::{ConfigStore, MergeLedger},
};

use crate::{Engine, Error, Result};

fn default_true() -> bool { true }

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
  pub primary_user_id:    String,
  pub duplicate_user_ids: Vec<String>,
  /// Falls back to the configured strategy.
  #[serde(default)]
  pub merge_strategy:     Option<MergeStrategy>,
  /// Attach the provenance history to the live primary.
  #[serde(default = "default_true")]
  pub preserve_channels:  bool,
  /// A caller-chosen key; repeating it for the same profiles returns the
  /// first outcome.
  #[serde(default)]
  pub idempotency_key:    Option<String>,
}

impl MergeRequest {
  pub fn new(
    primary_user_id: impl Into<String>,
    duplicate_user_ids: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Self {
      primary_user_id:    primary_user_id.into(),
      duplicate_user_ids: duplicate_user_ids.into_iter().map(Into::into).collect(),
      merge_strategy:     None,
      preserve_channels:  true,
      idempotency_key:    None,
    }
  }

  /// Whether `operation` merged the same profiles this request names, in
  /// any order.
  fn describes(&self, operation: &MergeOperation, duplicate_ids: &[String]) -> bool {
    let sorted = |ids: &[String]| {
      let mut ids = ids.to_vec();
      ids.sort();
      ids
    };
    operation.primary_user_id == self.primary_user_id
      && sorted(&operation.merged_user_ids) == sorted(duplicate_ids)
  }

  pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
    self.merge_strategy = Some(strategy);
    self
  }

  pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
    self.idempotency_key = Some(key.into());
    self
  }

  /// Check ids and drop repeated duplicates, keeping first occurrences.
  fn validate(&self) -> Result<Vec<String>> {
    if self.primary_user_id.trim().is_empty() {
      return Err(Error::Validation("primary_user_id is required".into()));
    }
    if self.duplicate_user_ids.is_empty() {
      return Err(Error::Validation(
        "duplicate_user_ids must name at least one profile".into(),
      ));
    }
    if self
      .idempotency_key
      .as_ref()
      .is_some_and(|k| k.trim().is_empty())
    {
      return Err(Error::Validation("idempotency_key cannot be blank".into()));
    }

    let mut ids: Vec<String> = Vec::with_capacity(self.duplicate_user_ids.len());
    for id in &self.duplicate_user_ids {
      if id.trim().is_empty() {
        return Err(Error::Validation("duplicate ids cannot be blank".into()));
      }
      if *id == self.primary_user_id {
        return Err(Error::Validation(format!(
          "profile {id:?} cannot be merged into itself"
        )));
      }
      if !ids.contains(id) {
        ids.push(id.clone());
      }
    }
    Ok(ids)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
  pub merge_operation_id:     i64,
  pub primary_user_id:        String,
  pub merged_user_ids:        Vec<String>,
  pub merged_user_count:      usize,
  pub merge_strategy:         MergeStrategy,
  /// Channels named in the attached history; empty when no history was
  /// attached.
  pub channels_preserved:     Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub deduplication_history:  Option<DeduplicationHistory>,
  /// Whether this outcome describes an operation recorded earlier rather
  /// than one written by this call.
  pub replayed:               bool,
}

impl MergeOutcome {
  fn new(
    operation: &MergeOperation,
    history: DeduplicationHistory,
    replayed: bool,
  ) -> Self {
    let history = operation.preserve_channels.then_some(history);
    Self {
      merge_operation_id: operation.id,
      primary_user_id: operation.primary_user_id.clone(),
      merged_user_ids: operation.merged_user_ids.clone(),
      merged_user_count: operation.merged_user_ids.len(),
      merge_strategy: operation.merge_strategy,
      channels_preserved: history
        .as_ref()
        .map(|h| h.channels.clone())
        .unwrap_or_default(),
      deduplication_history: history,
      replayed,
    }
  }
}

/// The history for a merge whose canonical record is `merged`, absorbing
/// `absorbed` as `(user_id, channel, diff)` triples.
fn build_history<'a>(
  merged: &Record,
  merged_at: DateTime<Utc>,
  absorbed: impl IntoIterator<Item = (&'a str, &'a str, &'a Diff)>,
) -> Result<DeduplicationHistory> {
  let primary = Profile::from_record(merged.clone())?;
  let mut history = DeduplicationHistory::for_primary(&primary);
  for (user_id, channel, diff) in absorbed {
    history.record(MergedUserEntry {
      user_id: user_id.to_owned(),
      channel: channel.to_owned(),
      merged_at,
      diff: diff.clone(),
    });
  }
  Ok(history)
}

/// The record pushed to the primary: the canonical record, with the history
/// attached when it is preserved.
fn canonical_record(
  mut merged: Record,
  history: Option<&DeduplicationHistory>,
) -> Result<Record> {
  if let Some(history) = history {
    merged.insert(HISTORY_ATTRIBUTE.to_owned(), history.to_field_value()?);
  }
  Ok(merged)
}

impl<P, L> Engine<P, L>
where
  P: ProfileStore,
  L: MergeLedger + ConfigStore,
{
  /// Merge `duplicate_user_ids` into `primary_user_id`.
  ///
  /// Both the primary and every duplicate must exist remotely; otherwise
  /// nothing is recorded. The ledger is committed before the remote store is
  /// touched.
  pub async fn merge(&self, request: MergeRequest) -> Result<MergeOutcome> {
    let duplicate_ids = request.validate()?;

    let strategy = match request.merge_strategy {
      Some(strategy) => strategy,
      None => self.config().await?.merge_strategy,
    };

    let mut keys = duplicate_ids.clone();
    keys.push(request.primary_user_id.clone());
    let _locks = self.locks.acquire(keys.iter().cloned()).await;

    if let Some(key) = &request.idempotency_key
      && let Some(existing) = self
        .stored(
          "find_by_idempotency_key",
          self.ledger.find_by_idempotency_key(key.clone()),
        )
        .await?
    {
      if !request.describes(&existing, &duplicate_ids) {
        return Err(Error::IdempotencyMismatch {
          key:          key.clone(),
          operation_id: existing.id,
        });
      }
      info!(
        operation_id = existing.id,
        idempotency_key = %key,
        "merge replayed from idempotency key"
      );
      return self.outcome_from_ledger(&existing).await;
    }

    let exported = self
      .remote("export", self.profiles.export(ProfileFilter::by_ids(keys)))
      .await?;
    let find = |id: &str| {
      exported
        .iter()
        .find(|p| p.external_id == id)
        .ok_or_else(|| Error::ProfileNotFound(id.to_owned()))
    };
    let primary = find(request.primary_user_id.as_str())?;
    let duplicates = duplicate_ids
      .iter()
      .map(|id| find(id.as_str()).cloned())
      .collect::<Result<Vec<_>>>()?;

    let merged = resolver::merge(primary, &duplicates, strategy).to_record()?;
    let diffs = duplicates
      .iter()
      .map(|d| -> Result<NewUserDiff> {
        let original = d.to_record()?;
        Ok(NewUserDiff {
          user_id:       d.external_id.clone(),
          channel_name:  d.channel_name().to_owned(),
          diff_data:     diff(&original, &merged),
          original_data: original,
          merged_data:   merged.clone(),
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let operation = self
      .stored(
        "record",
        self.ledger.record(
          NewMergeOperation {
            primary_user_id: request.primary_user_id.clone(),
            merged_user_ids: duplicate_ids.clone(),
            merge_strategy: strategy,
            preserve_channels: request.preserve_channels,
            idempotency_key: request.idempotency_key.clone(),
          },
          diffs.clone(),
        ),
      )
      .await?;
    info!(
      operation_id = operation.id,
      primary = %operation.primary_user_id,
      merged = ?operation.merged_user_ids,
      strategy = %strategy,
      "merge recorded"
    );

    let history = build_history(
      &merged,
      operation.created_at,
      diffs.iter().map(|d| {
        (d.user_id.as_str(), d.channel_name.as_str(), &d.diff_data)
      }),
    )?;

    self.apply_remote(&operation, merged, &history).await?;
    Ok(MergeOutcome::new(&operation, history, false))
  }

  /// Push the canonical record of a `completed` operation again and delete
  /// its absorbed profiles again.
  pub async fn reapply(&self, operation_id: i64) -> Result<MergeOutcome> {
    let operation = self.completed_operation(operation_id).await?;
    let _locks = self.locks.acquire(operation_keys(&operation)).await;

    // Re-read under the locks; an unmerge may have won the race.
    let operation = self.completed_operation(operation_id).await?;
    let diffs = self
      .stored("get_diffs", self.ledger.get_diffs(operation.id))
      .await?;
    let merged = diffs
      .first()
      .map(|d| d.merged_data.clone())
      .ok_or_else(|| {
        Error::Validation(format!("merge operation {operation_id} has no diffs"))
      })?;
    let history = build_history(
      &merged,
      operation.created_at,
      diffs.iter().map(|d| {
        (d.user_id.as_str(), d.channel_name.as_str(), &d.diff_data)
      }),
    )?;

    self.apply_remote(&operation, merged, &history).await?;
    info!(operation_id, "merge reapplied");
    Ok(MergeOutcome::new(&operation, history, true))
  }

  /// Update the primary, then delete the absorbed profiles.
  async fn apply_remote(
    &self,
    operation: &MergeOperation,
    merged: Record,
    history: &DeduplicationHistory,
  ) -> Result<()> {
    let record = canonical_record(
      merged,
      operation.preserve_channels.then_some(history),
    )?;

    let applied = async {
      self
        .remote("upsert", self.profiles.upsert(vec![record]))
        .await?;
      self
        .remote(
          "delete",
          self.profiles.delete(operation.merged_user_ids.clone()),
        )
        .await
    }
    .await;

    match applied {
      Ok(deleted) => {
        info!(operation_id = operation.id, deleted, "merge applied remotely");
        Ok(())
      }
      Err(e) => {
        warn!(
          operation_id = operation.id,
          error = %e,
          "remote apply failed after the merge was recorded; reapply to finish"
        );
        Err(e)
      }
    }
  }

  /// Rebuild the outcome of an operation recorded earlier.
  async fn outcome_from_ledger(
    &self,
    operation: &MergeOperation,
  ) -> Result<MergeOutcome> {
    let diffs = self
      .stored("get_diffs", self.ledger.get_diffs(operation.id))
      .await?;
    let history = match diffs.first() {
      Some(first) => build_history(
        &first.merged_data,
        operation.created_at,
        diffs.iter().map(|d| {
          (d.user_id.as_str(), d.channel_name.as_str(), &d.diff_data)
        }),
      )?,
      None => DeduplicationHistory::default(),
    };
    Ok(MergeOutcome::new(operation, history, true))
  }

  /// Load an operation that must exist and still be `completed`.
  pub(crate) async fn completed_operation(
    &self,
    operation_id: i64,
  ) -> Result<MergeOperation> {
    let operation = self
      .stored("get_operation", self.ledger.get_operation(operation_id))
      .await?
      .ok_or(Error::OperationNotFound(operation_id))?;
    match operation.status {
      OperationStatus::Completed => Ok(operation),
      OperationStatus::Reverted => Err(Error::AlreadyReverted(operation_id)),
      status => Err(Error::NotCompleted {
        id:     operation_id,
        status: status.to_string(),
      }),
    }
  }
}

/// Every profile id an operation touches.
pub(crate) fn operation_keys(operation: &MergeOperation) -> Vec<String> {
  let mut keys = operation.merged_user_ids.clone();
  keys.push(operation.primary_user_id.clone());
  keys
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_deduplicates_and_keeps_order() {
    let req = MergeRequest::new("p", ["b", "a", "b"]);
    assert_eq!(req.validate().unwrap(), ["b", "a"]);
  }

  #[test]
  fn validate_rejects_bad_requests() {
    assert!(MergeRequest::new("", ["a"]).validate().is_err());
    assert!(MergeRequest::new("p", Vec::<String>::new()).validate().is_err());
    assert!(MergeRequest::new("p", ["p"]).validate().is_err());
    assert!(MergeRequest::new("p", [" "]).validate().is_err());
    assert!(
      MergeRequest::new("p", ["a"])
        .with_idempotency_key("  ")
        .validate()
        .is_err()
    );
  }

  #[test]
  fn request_defaults_from_json() {
    let req: MergeRequest = serde_json::from_str(
      r#"{"primary_user_id":"2","duplicate_user_ids":["1"]}"#,
    )
    .unwrap();
    assert!(req.preserve_channels);
    assert_eq!(req.merge_strategy, None);
    assert_eq!(req.idempotency_key, None);
  }

  #[test]
  fn canonical_record_attaches_history_only_when_preserved() {
    let merged = Profile::new("2").to_record().unwrap();
    let history = DeduplicationHistory::default();

    let with = canonical_record(merged.clone(), Some(&history)).unwrap();
    assert!(with.contains_key(HISTORY_ATTRIBUTE));

    let without = canonical_record(merged, None).unwrap();
    assert!(!without.contains_key(HISTORY_ATTRIBUTE));
  }
}
