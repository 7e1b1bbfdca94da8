//! Orchestration of scans, merges, unmerges and reapplies.
//!
//! [`Engine`] ties a remote [`ProfileStore`] to a [`MergeLedger`] and
//! [`ConfigStore`]. Every remote call is bounded by a timeout, and every
//! operation that mutates profiles holds the per-profile locks of all the ids
//! it touches.
//!
//! The ledger is written before the remote store. If the remote apply then
//! fails, the operation stays `completed` and [`Engine::reapply`] finishes it.

pub mod locks;
pub mod merge;
pub mod operations;
pub mod scan;
pub mod unmerge;
pub mod webhook;

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use dedup_core::{
  config::{ConfigUpdate, DeduplicationConfig},
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
};

pub use dedup_core::{Error, ErrorKind, Result};

use crate::locks::KeyedLocks;

/// Default bound on every remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of profiles exported for webhook matching and
/// potential-duplicate reports.
pub const DEFAULT_EXPORT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct EngineOptions {
  pub remote_timeout:    Duration,
  /// Working-set size for paths that do not take a batch size of their own.
  pub export_batch_size: usize,
}

impl Default for EngineOptions {
  fn default() -> Self {
    Self {
      remote_timeout:    DEFAULT_REMOTE_TIMEOUT,
      export_batch_size: DEFAULT_EXPORT_BATCH_SIZE,
    }
  }
}

/// Result of [`Engine::health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  pub status: &'static str,
  pub ledger: &'static str,
}

/// The deduplication engine. Cheap to clone.
pub struct Engine<P, L> {
  profiles: Arc<P>,
  ledger:   Arc<L>,
  locks:    Arc<KeyedLocks>,
  options:  EngineOptions,
}

impl<P, L> Clone for Engine<P, L> {
  fn clone(&self) -> Self {
    Self {
      profiles: Arc::clone(&self.profiles),
      ledger:   Arc::clone(&self.ledger),
      locks:    Arc::clone(&self.locks),
      options:  self.options.clone(),
    }
  }
}

impl<P, L> Engine<P, L>
where
  P: ProfileStore,
  L: MergeLedger + ConfigStore,
{
  pub fn new(profiles: P, ledger: L, options: EngineOptions) -> Self {
    Self {
      profiles: Arc::new(profiles),
      ledger: Arc::new(ledger),
      locks: Arc::new(KeyedLocks::default()),
      options,
    }
  }

  pub fn profiles(&self) -> &P { &self.profiles }

  pub fn ledger(&self) -> &L { &self.ledger }

  pub fn options(&self) -> &EngineOptions { &self.options }

  /// Run a remote call under the configured timeout.
  async fn remote<T, E, F>(&self, operation: &'static str, call: F) -> Result<T>
  where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
  {
    let after = self.options.remote_timeout;
    match tokio::time::timeout(after, call).await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) => Err(Error::upstream(operation, e)),
      Err(_) => Err(Error::UpstreamTimeout { operation, after }),
    }
  }

  /// Run a ledger or configuration store call, classifying its error.
  async fn stored<T, E, F>(&self, operation: &'static str, call: F) -> Result<T>
  where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
  {
    call.await.map_err(|e| Error::persistence(operation, e))
  }

  // ── Configuration ─────────────────────────────────────────────────────────

  /// The stored configuration, or the defaults if none was ever written.
  pub async fn config(&self) -> Result<DeduplicationConfig> {
    Ok(
      self
        .stored("get_config", self.ledger.get_config())
        .await?
        .unwrap_or_default(),
    )
  }

  /// Replace the configuration. Omitted fields take their defaults.
  pub async fn update_config(
    &self,
    update: ConfigUpdate,
  ) -> Result<DeduplicationConfig> {
    let config = update.into_config(Utc::now())?;
    let stored = self
      .stored("put_config", self.ledger.put_config(config))
      .await?;
    info!(
      matching_fields = ?stored.matching_fields,
      strategy = %stored.merge_strategy,
      auto_merge = stored.auto_merge_enabled,
      "configuration updated"
    );
    Ok(stored)
  }

  /// Verify the ledger answers.
  pub async fn health(&self) -> Result<HealthReport> {
    self.stored("get_config", self.ledger.get_config()).await?;
    Ok(HealthReport { status: "healthy", ledger: "ok" })
  }
}

#[cfg(test)]
mod tests;
