//! The `MergeLedger` and `ConfigStore` traits.
//!
//! Implemented by storage backends (e.g. `dedup-store-sqlite`). The engine
//! depends on these abstractions, not on any concrete backend.

use std::future::Future;

use crate::{
  config::DeduplicationConfig,
  operation::{
    MergeOperation, NewMergeOperation, NewUserDiff, OperationPage,
    OperationQuery, UserDiff,
  },
};

/// Durable record of every merge and the diffs needed to reverse it.
///
/// Operations are never deleted. Their status only moves from `completed`
/// to `reverted`, through [`MergeLedger::mark_reverted`].
pub trait MergeLedger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist an operation together with all of its diffs as one atomic
  /// unit: either every row exists afterwards or none does.
  fn record(
    &self,
    operation: NewMergeOperation,
    diffs: Vec<NewUserDiff>,
  ) -> impl Future<Output = Result<MergeOperation, Self::Error>> + Send + '_;

  fn get_operation(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<MergeOperation>, Self::Error>> + Send + '_;

  /// Look up the operation a caller previously recorded under `key`.
  fn find_by_idempotency_key(
    &self,
    key: String,
  ) -> impl Future<Output = Result<Option<MergeOperation>, Self::Error>> + Send + '_;

  /// All diffs of an operation, in insertion order.
  fn get_diffs(
    &self,
    operation_id: i64,
  ) -> impl Future<Output = Result<Vec<UserDiff>, Self::Error>> + Send + '_;

  fn list_operations(
    &self,
    query: OperationQuery,
  ) -> impl Future<Output = Result<OperationPage, Self::Error>> + Send + '_;

  /// Move a `completed` operation to `reverted`. Returns `false`, changing
  /// nothing, if the operation is missing or not `completed`.
  fn mark_reverted(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

/// Single-row storage for [`DeduplicationConfig`].
pub trait ConfigStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The stored configuration, or `None` if none was ever written.
  fn get_config(
    &self,
  ) -> impl Future<Output = Result<Option<DeduplicationConfig>, Self::Error>> + Send + '_;

  /// Replace the stored configuration.
  fn put_config(
    &self,
    config: DeduplicationConfig,
  ) -> impl Future<Output = Result<DeduplicationConfig, Self::Error>> + Send + '_;
}
