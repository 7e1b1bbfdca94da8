//! The `ProfileStore` trait: the remote CRM as the core sees it.
//!
//! Implemented by `dedup-remote` (an HTTP client and an in-memory store).
//! The engine wraps every call in a timeout; implementations need not.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::{Profile, Record};

/// Parameters for [`ProfileStore::export`]. An empty filter exports
/// everything, bounded only by `limit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFilter {
  /// Restrict to these ids. Empty means no restriction.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub external_ids:   Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub channel:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_after:  Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_before: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub offset:         Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limit:          Option<usize>,
}

impl ProfileFilter {
  pub fn by_ids(ids: impl IntoIterator<Item = String>) -> Self {
    Self { external_ids: ids.into_iter().collect(), ..Default::default() }
  }

  /// Whether `profile` passes every criterion except paging.
  pub fn matches(&self, profile: &Profile) -> bool {
    if !self.external_ids.is_empty()
      && !self.external_ids.contains(&profile.external_id)
    {
      return false;
    }
    if let Some(channel) = &self.channel
      && profile.channel.as_ref() != Some(channel)
    {
      return false;
    }
    if let Some(after) = self.created_after
      && profile.created_at.is_none_or(|at| at < after)
    {
      return false;
    }
    if let Some(before) = self.created_before
      && profile.created_at.is_none_or(|at| at > before)
    {
      return false;
    }
    true
  }
}

/// Abstraction over the remote profile store.
///
/// `upsert` and `delete` must be idempotent: the engine repeats them when a
/// merge is reapplied.
pub trait ProfileStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Bulk read of profiles matching `filter`, in the store's natural order.
  fn export(
    &self,
    filter: ProfileFilter,
  ) -> impl Future<Output = Result<Vec<Profile>, Self::Error>> + Send + '_;

  /// Write each record onto the profile named by its `external_id`,
  /// creating the profile if needed. A `null` value removes the attribute.
  fn upsert(
    &self,
    records: Vec<Record>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Remove profiles by id. Returns how many existed.
  fn delete(
    &self,
    external_ids: Vec<String>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
