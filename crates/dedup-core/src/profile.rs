//! A customer identity record owned by the remote CRM.
//!
//! Profiles carry a small typed envelope (`external_id`, `channel`,
//! `created_at`) and an open-ended set of attributes. The remote store is
//! schemaless, so attribute values are a tagged union rather than a fixed
//! struct. The core only ever holds transient copies of profiles.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Result, time::parse_timestamp};

// ─── Reserved keys ───────────────────────────────────────────────────────────

/// Attribute under which provenance is attached to a primary profile.
pub const HISTORY_ATTRIBUTE: &str = "deduplication_history";

/// Channel name reported for profiles that carry no origin tag.
pub const UNKNOWN_CHANNEL: &str = "unknown";

/// Keys that identify a record rather than describe the customer. They are
/// never resolved by merge strategy and cannot be used as matching fields.
pub const RESERVED_KEYS: &[&str] =
  &["external_id", "channel", "created_at", HISTORY_ATTRIBUTE];

pub fn is_reserved(key: &str) -> bool { RESERVED_KEYS.contains(&key) }

// ─── FieldValue ──────────────────────────────────────────────────────────────

/// A single attribute value as the remote store represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  Null,
  Bool(bool),
  Number(serde_json::Number),
  String(String),
  List(Vec<FieldValue>),
  Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
  /// `null` and the empty string carry no information for matching or
  /// completeness purposes.
  pub fn is_empty(&self) -> bool {
    match self {
      Self::Null => true,
      Self::String(s) => s.is_empty(),
      _ => false,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  /// Convert any serialisable value into its attribute form.
  pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
  }

  /// Interpret this attribute as a structured value.
  pub fn to_deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(self)?)?)
  }
}

impl From<&str> for FieldValue {
  fn from(s: &str) -> Self { Self::String(s.to_owned()) }
}

impl From<String> for FieldValue {
  fn from(s: String) -> Self { Self::String(s) }
}

impl From<bool> for FieldValue {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i64> for FieldValue {
  fn from(n: i64) -> Self { Self::Number(n.into()) }
}

/// The flat key → value form of a profile: envelope and attributes alike.
///
/// Records are what the ledger snapshots, what diffs are computed over, and
/// what is pushed to the remote store on upsert.
pub type Record = BTreeMap<String, FieldValue>;

// ─── Profile ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  pub external_id: String,
  /// Origin system tag, e.g. `website` or `facebook`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub channel:     Option<String>,
  /// Accepts RFC 3339, a bare date or epoch seconds. A value in any other
  /// form reads as absent rather than failing the whole profile.
  #[serde(
    default,
    deserialize_with = "lenient_created_at",
    skip_serializing_if = "Option::is_none"
  )]
  pub created_at:  Option<DateTime<Utc>>,
  /// Every other attribute (`email`, `phone`, `device_id`, names, ...).
  #[serde(flatten)]
  pub attributes:  BTreeMap<String, FieldValue>,
}

fn lenient_created_at<'de, D>(
  deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<FieldValue>::deserialize(deserializer)? {
    Some(FieldValue::String(s)) => parse_timestamp(&s, NaiveTime::MIN),
    Some(FieldValue::Number(n)) => {
      n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
    _ => None,
  })
}

impl Profile {
  pub fn new(external_id: impl Into<String>) -> Self {
    Self {
      external_id: external_id.into(),
      channel:     None,
      created_at:  None,
      attributes:  BTreeMap::new(),
    }
  }

  pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
    self.channel = Some(channel.into());
    self
  }

  pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
    self.created_at = Some(at);
    self
  }

  pub fn with_attribute(
    mut self,
    key: impl Into<String>,
    value: impl Into<FieldValue>,
  ) -> Self {
    self.attributes.insert(key.into(), value.into());
    self
  }

  pub fn attribute(&self, key: &str) -> Option<&FieldValue> {
    self.attributes.get(key)
  }

  /// The attribute value if it is present and non-empty.
  pub fn present(&self, key: &str) -> Option<&FieldValue> {
    self.attribute(key).filter(|v| !v.is_empty())
  }

  pub fn channel_name(&self) -> &str {
    self.channel.as_deref().unwrap_or(UNKNOWN_CHANNEL)
  }

  /// The full flat snapshot of this profile.
  pub fn to_record(&self) -> Result<Record> {
    Ok(serde_json::from_value(serde_json::to_value(self)?)?)
  }

  /// Rebuild a profile from its flat snapshot.
  pub fn from_record(record: Record) -> Result<Self> {
    Ok(serde_json::from_value(serde_json::to_value(record)?)?)
  }
}
