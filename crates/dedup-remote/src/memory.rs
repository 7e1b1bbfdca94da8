//! In-process profile store.

use std::{path::Path, sync::Arc, time::Duration};

use dedup_core::{
  profile::{FieldValue, Profile, Record},
  remote::{ProfileFilter, ProfileStore},
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Error, Result};

#[derive(Default)]
struct Inner {
  /// Insertion order is export order.
  profiles:      Vec<Profile>,
  write_latency: Option<Duration>,
  fail_writes:   bool,
}

/// A [`ProfileStore`] kept entirely in memory.
///
/// Upserts merge keys into an existing profile (`null` removes an
/// attribute) and create unknown profiles, mirroring the vendor API. Clones
/// share the same profiles.
#[derive(Clone, Default)]
pub struct MemoryProfileStore {
  inner: Arc<RwLock<Inner>>,
}

impl MemoryProfileStore {
  pub fn new() -> Self { Self::default() }

  pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
    Self {
      inner: Arc::new(RwLock::new(Inner {
        profiles: profiles.into_iter().collect(),
        ..Default::default()
      })),
    }
  }

  /// Load a JSON array of profiles.
  pub async fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
    let bytes = tokio::fs::read(path).await?;
    let profiles: Vec<Profile> = serde_json::from_slice(&bytes)?;
    Ok(Self::with_profiles(profiles))
  }

  /// Delay every `upsert` and `delete` by `latency`.
  pub async fn set_write_latency(&self, latency: Option<Duration>) {
    self.inner.write().await.write_latency = latency;
  }

  /// Make every `upsert` and `delete` fail.
  pub async fn set_fail_writes(&self, fail: bool) {
    self.inner.write().await.fail_writes = fail;
  }

  pub async fn get(&self, external_id: &str) -> Option<Profile> {
    self
      .inner
      .read()
      .await
      .profiles
      .iter()
      .find(|p| p.external_id == external_id)
      .cloned()
  }

  /// Every stored profile, in insertion order.
  pub async fn snapshot(&self) -> Vec<Profile> {
    self.inner.read().await.profiles.clone()
  }

  async fn delay_write(&self) {
    let latency = self.inner.read().await.write_latency;
    if let Some(latency) = latency {
      tokio::time::sleep(latency).await;
    }
  }
}

/// Apply `record` on top of `existing`, or build a new profile from it.
fn apply(existing: Option<&Profile>, record: Record) -> Result<Profile> {
  let mut merged = match existing {
    Some(profile) => profile.to_record()?,
    None => Record::new(),
  };
  for (key, value) in record {
    if value == FieldValue::Null {
      merged.remove(&key);
    } else {
      merged.insert(key, value);
    }
  }
  Ok(Profile::from_record(merged)?)
}

impl ProfileStore for MemoryProfileStore {
  type Error = Error;

  async fn export(&self, filter: ProfileFilter) -> Result<Vec<Profile>> {
    let inner = self.inner.read().await;
    let profiles: Vec<Profile> = inner
      .profiles
      .iter()
      .filter(|p| filter.matches(p))
      .skip(filter.offset.unwrap_or(0))
      .take(filter.limit.unwrap_or(usize::MAX))
      .cloned()
      .collect();
    Ok(profiles)
  }

  async fn upsert(&self, records: Vec<Record>) -> Result<()> {
    self.delay_write().await;
    let mut inner = self.inner.write().await;
    if inner.fail_writes {
      return Err(Error::WritesDisabled);
    }

    // Work on a copy so a bad record leaves the store untouched.
    let mut profiles = inner.profiles.clone();
    for record in records {
      let id = record
        .get("external_id")
        .and_then(FieldValue::as_str)
        .ok_or(Error::MissingExternalId)?
        .to_owned();
      match profiles.iter().position(|p| p.external_id == id) {
        Some(i) => profiles[i] = apply(Some(&profiles[i]), record)?,
        None => profiles.push(apply(None, record)?),
      }
    }
    inner.profiles = profiles;
    debug!(total = inner.profiles.len(), "upserted into memory store");
    Ok(())
  }

  async fn delete(&self, external_ids: Vec<String>) -> Result<usize> {
    self.delay_write().await;
    let mut inner = self.inner.write().await;
    if inner.fail_writes {
      return Err(Error::WritesDisabled);
    }
    let before = inner.profiles.len();
    inner.profiles.retain(|p| !external_ids.contains(&p.external_id));
    Ok(before - inner.profiles.len())
  }
}
