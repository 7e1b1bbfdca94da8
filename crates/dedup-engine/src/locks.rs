//! Per-profile async locks.

use std::{
  collections::{BTreeSet, HashMap},
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// A table of async mutexes keyed by profile id.
///
/// Slots are created on demand and pruned once no [`LockSet`] holds or
/// awaits them.
#[derive(Default)]
pub struct KeyedLocks {
  slots: Mutex<HashMap<String, Slot>>,
}

/// Guards for a set of keys. Dropping it releases every key.
pub struct LockSet {
  guards: Vec<OwnedMutexGuard<()>>,
  keys:   Vec<String>,
  table:  Arc<KeyedLocks>,
}

impl KeyedLocks {
  fn slot(&self, key: &str) -> Slot {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    slots.entry(key.to_owned()).or_default().clone()
  }

  /// Lock every key, in sorted order so overlapping sets cannot deadlock.
  pub async fn acquire<I, S>(self: &Arc<Self>, keys: I) -> LockSet
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let keys: Vec<String> = keys
      .into_iter()
      .map(Into::into)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();

    let mut guards = Vec::with_capacity(keys.len());
    for key in &keys {
      let slot = self.slot(key);
      guards.push(slot.lock_owned().await);
    }

    LockSet { guards, keys, table: Arc::clone(self) }
  }

  /// Number of live slots.
  pub fn len(&self) -> usize {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Drop for LockSet {
  fn drop(&mut self) {
    self.guards.clear();
    let mut slots = self
      .table
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    for key in &self.keys {
      // Only the table's own reference remains.
      if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
        slots.remove(key);
      }
    }
  }
}
