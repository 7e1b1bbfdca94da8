//! Reverting a merge from its recorded diffs.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dedup_core::{
  diff::DeduplicationHistory,
  operation::MergeOperation,
  profile::{FieldValue, HISTORY_ATTRIBUTE, Record},
  remote::{ProfileFilter, ProfileStore},
  store::{ConfigStore, MergeLedger},
};

use crate::{Engine, Error, Result, merge::operation_keys};

fn default_true() -> bool { true }

#[derive(Debug, Clone, Deserialize)]
pub struct UnmergeRequest {
  pub merge_operation_id:     i64,
  /// Push the absorbed profiles back and remove this merge from the
  /// primary's history.
  /// When `false` the operation is only marked reverted.
  #[serde(default = "default_true")]
  pub restore_original_users: bool,
}

impl UnmergeRequest {
  pub fn new(merge_operation_id: i64) -> Self {
    Self { merge_operation_id, restore_original_users: true }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmergeOutcome {
  pub merge_operation_id: i64,
  pub primary_user_id:    String,
  /// Number of absorbed profiles the operation recorded.
  pub reverted_users:     usize,
  /// Ids pushed back to the remote store.
  pub restored_user_ids:  Vec<String>,
}

impl<P, L> Engine<P, L>
where
  P: ProfileStore,
  L: MergeLedger + ConfigStore,
{
  /// Restore every absorbed profile verbatim, then mark the operation
  /// reverted. A remote failure leaves the operation `completed`.
  pub async fn unmerge(&self, request: UnmergeRequest) -> Result<UnmergeOutcome> {
    let id = request.merge_operation_id;
    let operation = self.completed_operation(id).await?;
    let _locks = self.locks.acquire(operation_keys(&operation)).await;

    let operation = self.completed_operation(id).await?;
    let diffs = self.stored("get_diffs", self.ledger.get_diffs(id)).await?;

    let mut restored_user_ids = Vec::new();
    if request.restore_original_users {
      let originals: Vec<Record> =
        diffs.iter().map(|d| d.original_data.clone()).collect();

      let restored = async {
        self.remote("upsert", self.profiles.upsert(originals)).await?;
        if operation.preserve_channels {
          self.forget_history(&operation).await?;
        }
        Ok::<_, Error>(())
      }
      .await;

      if let Err(e) = restored {
        warn!(operation_id = id, error = %e, "unmerge failed remotely; operation left completed");
        return Err(e);
      }
      restored_user_ids = diffs.iter().map(|d| d.user_id.clone()).collect();
    }

    if !self
      .stored("mark_reverted", self.ledger.mark_reverted(id))
      .await?
    {
      return Err(Error::AlreadyReverted(id));
    }

    info!(
      operation_id = id,
      primary = %operation.primary_user_id,
      restored = ?restored_user_ids,
      "merge reverted"
    );
    Ok(UnmergeOutcome {
      merge_operation_id: id,
      primary_user_id: operation.primary_user_id,
      reverted_users: diffs.len(),
      restored_user_ids,
    })
  }

  /// Remove this operation's entries from the primary's history, keeping
  /// those of other merges. The attribute is cleared once nothing remains.
  async fn forget_history(&self, operation: &MergeOperation) -> Result<()> {
    let primary = self
      .remote(
        "export",
        self
          .profiles
          .export(ProfileFilter::by_ids([operation.primary_user_id.clone()])),
      )
      .await?
      .into_iter()
      .find(|p| p.external_id == operation.primary_user_id);
    let Some(primary) = primary else {
      warn!(
        operation_id = operation.id,
        primary = %operation.primary_user_id,
        "primary profile is gone; history left as is"
      );
      return Ok(());
    };

    let mut history = DeduplicationHistory::for_primary(&primary);
    history.forget(
      primary.channel_name(),
      &operation.merged_user_ids,
      operation.created_at,
    );
    let value = if history.merged_users.is_empty() {
      FieldValue::Null
    } else {
      history.to_field_value()?
    };

    let mut record = Record::new();
    record.insert(
      "external_id".to_owned(),
      operation.primary_user_id.as_str().into(),
    );
    record.insert(HISTORY_ATTRIBUTE.to_owned(), value);
    self.remote("upsert", self.profiles.upsert(vec![record])).await
  }
}
