//! Field-level diffs and the provenance history attached to primaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  profile::{FieldValue, HISTORY_ATTRIBUTE, Profile, Record},
};

// ─── Diff ────────────────────────────────────────────────────────────────────

/// One changed key. `old` is `None` when the key was absent from the
/// original record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
  #[serde(default)]
  pub old: Option<FieldValue>,
  pub new: FieldValue,
}

pub type Diff = BTreeMap<String, FieldChange>;

/// Every key of `merged` whose value differs from `original`, including
/// keys `original` does not have. Keys only present in `original` are not
/// reported; the full original snapshot is kept separately for unmerge.
///
/// The provenance attribute is never diffed; history entries embed diffs.
pub fn diff(original: &Record, merged: &Record) -> Diff {
  merged
    .iter()
    .filter(|(key, _)| key.as_str() != HISTORY_ATTRIBUTE)
    .filter(|(key, new)| original.get(*key) != Some(*new))
    .map(|(key, new)| {
      (key.clone(), FieldChange {
        old: original.get(key).cloned(),
        new: new.clone(),
      })
    })
    .collect()
}

// ─── History ─────────────────────────────────────────────────────────────────

/// A single absorbed profile as recorded on the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedUserEntry {
  pub user_id:   String,
  pub channel:   String,
  pub merged_at: DateTime<Utc>,
  pub diff:      Diff,
}

/// Provenance attached to a live primary profile under
/// [`HISTORY_ATTRIBUTE`], so downstream consumers see every profile merged
/// into it without consulting the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationHistory {
  pub merged_users: Vec<MergedUserEntry>,
  /// Channel names in first-seen order, without repeats.
  pub channels:     Vec<String>,
}

impl DeduplicationHistory {
  /// Start from whatever history `primary` already carries, or an empty one
  /// seeded with the primary's own channel.
  ///
  /// A history attribute that does not parse is replaced rather than
  /// failing the merge.
  pub fn for_primary(primary: &Profile) -> Self {
    let mut history = primary
      .attribute(HISTORY_ATTRIBUTE)
      .filter(|v| !v.is_empty())
      .and_then(|v| v.to_deserialize::<Self>().ok())
      .unwrap_or_default();
    history.add_channel(primary.channel_name());
    history
  }

  pub fn add_channel(&mut self, channel: &str) {
    if !self.channels.iter().any(|c| c == channel) {
      self.channels.push(channel.to_owned());
    }
  }

  pub fn record(&mut self, entry: MergedUserEntry) {
    self.add_channel(&entry.channel);
    self.merged_users.push(entry);
  }

  /// Drop the entries one merge added: `user_ids` absorbed at `merged_at`.
  /// Channels no remaining entry names are dropped as well, except
  /// `own_channel`.
  pub fn forget(
    &mut self,
    own_channel: &str,
    user_ids: &[String],
    merged_at: DateTime<Utc>,
  ) {
    self
      .merged_users
      .retain(|e| e.merged_at != merged_at || !user_ids.contains(&e.user_id));
    let users = &self.merged_users;
    self
      .channels
      .retain(|c| c == own_channel || users.iter().any(|e| &e.channel == c));
  }

  pub fn to_field_value(&self) -> Result<FieldValue> {
    FieldValue::from_serialize(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
      .collect()
  }

  #[test]
  fn diff_of_identical_records_is_empty() {
    let a = record(&[("external_id", "1"), ("email", "a@x.com")]);
    assert!(diff(&a, &a).is_empty());
    assert!(diff(&Record::new(), &Record::new()).is_empty());
  }

  #[test]
  fn diff_reports_changed_and_missing_keys() {
    let original = record(&[
      ("external_id", "user_123"),
      ("first_name", "John"),
      ("email", "a@x.com"),
      ("only_here", "x"),
    ]);
    let merged = record(&[
      ("external_id", "user_456"),
      ("first_name", "Johnny"),
      ("email", "a@x.com"),
      ("phone", "+1"),
    ]);

    let d = diff(&original, &merged);
    assert_eq!(d.len(), 3);
    assert_eq!(d["external_id"].old, Some(FieldValue::from("user_123")));
    assert_eq!(d["external_id"].new, FieldValue::from("user_456"));
    assert_eq!(d["first_name"].new, FieldValue::from("Johnny"));
    assert_eq!(d["phone"].old, None);
    assert!(!d.contains_key("email"));
    assert!(!d.contains_key("only_here"));
  }

  #[test]
  fn history_attribute_is_never_diffed() {
    let original = record(&[("external_id", "1"), ("email", "a@x.com")]);
    let mut merged = record(&[("external_id", "2"), ("email", "a@x.com")]);
    merged.insert(HISTORY_ATTRIBUTE.into(), FieldValue::from("earlier"));

    let d = diff(&original, &merged);
    assert_eq!(d.len(), 1);
    assert!(d.contains_key("external_id"));
    assert!(!d.contains_key(HISTORY_ATTRIBUTE));
  }

  #[test]
  fn null_in_merged_differs_from_missing() {
    let original = Record::new();
    let mut merged = Record::new();
    merged.insert("nickname".into(), FieldValue::Null);
    assert_eq!(diff(&original, &merged).len(), 1);
  }

  #[test]
  fn history_seeds_primary_channel_and_dedups_channels() {
    let primary = Profile::new("p").with_channel("website");
    let mut history = DeduplicationHistory::for_primary(&primary);
    assert_eq!(history.channels, ["website"]);

    for (id, channel) in [("a", "facebook"), ("b", "website"), ("c", "facebook")] {
      history.record(MergedUserEntry {
        user_id:   id.into(),
        channel:   channel.into(),
        merged_at: Utc::now(),
        diff:      Diff::new(),
      });
    }
    assert_eq!(history.channels, ["website", "facebook"]);
    assert_eq!(history.merged_users.len(), 3);
  }

  #[test]
  fn history_accumulates_onto_existing_attribute() {
    let mut earlier = DeduplicationHistory::default();
    earlier.add_channel("website");
    earlier.record(MergedUserEntry {
      user_id:   "old".into(),
      channel:   "partners".into(),
      merged_at: Utc::now(),
      diff:      Diff::new(),
    });

    let primary = Profile::new("p")
      .with_channel("website")
      .with_attribute(HISTORY_ATTRIBUTE, earlier.to_field_value().unwrap());

    let history = DeduplicationHistory::for_primary(&primary);
    assert_eq!(history, earlier);
  }

  #[test]
  fn forget_removes_only_one_merge() {
    let first = Utc::now() - chrono::Duration::days(1);
    let second = Utc::now();
    let entry = |id: &str, channel: &str, at| MergedUserEntry {
      user_id:   id.into(),
      channel:   channel.into(),
      merged_at: at,
      diff:      Diff::new(),
    };

    let mut history =
      DeduplicationHistory::for_primary(&Profile::new("p").with_channel("website"));
    history.record(entry("a", "facebook", first));
    history.record(entry("b", "partners", second));
    history.record(entry("c", "website", second));

    history.forget("website", &["b".into(), "c".into()], second);
    assert_eq!(history.merged_users.len(), 1);
    assert_eq!(history.merged_users[0].user_id, "a");
    assert_eq!(history.channels, ["website", "facebook"]);

    // Same user id, different merge: untouched.
    history.forget("website", &["a".into()], second);
    assert_eq!(history.merged_users.len(), 1);
  }

  #[test]
  fn unparseable_history_starts_fresh() {
    let primary = Profile::new("p").with_attribute(HISTORY_ATTRIBUTE, "garbage");
    let history = DeduplicationHistory::for_primary(&primary);
    assert!(history.merged_users.is_empty());
    assert_eq!(history.channels, ["unknown"]);
  }
}
