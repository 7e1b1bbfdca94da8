//! Primary selection and canonical record construction.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
  Error,
  profile::{Profile, is_reserved},
};

/// How conflicting attribute values are reconciled into the canonical
/// record. Primary selection is independent of the strategy.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
  /// Each attribute comes from the most recently created contributor that
  /// supplies a non-empty value.
  #[default]
  MostRecent,
  /// The primary's value wins unless it is empty, in which case the first
  /// duplicate supplying a value fills the gap.
  MostComplete,
}

impl MergeStrategy {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::MostRecent => "most_recent",
      Self::MostComplete => "most_complete",
    }
  }
}

impl fmt::Display for MergeStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MergeStrategy {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "most_recent" => Ok(Self::MostRecent),
      "most_complete" => Ok(Self::MostComplete),
      other => Err(Error::Validation(format!(
        "unknown merge strategy: {other:?}"
      ))),
    }
  }
}

/// Pick the surviving profile of a cluster: the latest `created_at`, with
/// ties going to the first encountered. Profiles without a timestamp sort
/// below every timestamped profile.
pub fn resolve_primary(cluster: &[Profile]) -> Option<&Profile> {
  let mut best: Option<&Profile> = None;
  for candidate in cluster {
    match best {
      Some(current) if candidate.created_at <= current.created_at => {}
      _ => best = Some(candidate),
    }
  }
  best
}

/// Build the canonical record for `primary` absorbing `duplicates`.
///
/// The result starts as a clone of the primary, so its envelope and any
/// existing deduplication history are kept as-is. Only non-reserved
/// attributes are reconciled.
pub fn merge(
  primary: &Profile,
  duplicates: &[Profile],
  strategy: MergeStrategy,
) -> Profile {
  let mut merged = primary.clone();

  let keys: BTreeSet<&String> = duplicates
    .iter()
    .flat_map(|d| d.attributes.keys())
    .filter(|k| !is_reserved(k))
    .collect();

  for key in keys {
    let winner = match strategy {
      MergeStrategy::MostComplete => {
        if primary.present(key).is_some() {
          continue;
        }
        duplicates.iter().find_map(|d| d.present(key))
      }
      MergeStrategy::MostRecent => {
        let mut best: Option<&Profile> =
          primary.present(key).map(|_| primary);
        for d in duplicates.iter().filter(|d| d.present(key).is_some()) {
          match best {
            Some(current) if d.created_at <= current.created_at => {}
            _ => best = Some(d),
          }
        }
        best.and_then(|p| p.present(key))
      }
    };

    if let Some(value) = winner {
      merged.attributes.insert(key.clone(), value.clone());
    }
  }

  merged
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::profile::{FieldValue, HISTORY_ATTRIBUTE};

  fn at(day: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
  }

  #[test]
  fn primary_is_most_recent() {
    let cluster = [
      Profile::new("1").with_created_at(at(15)),
      Profile::new("2").with_created_at(at(20)),
      Profile::new("3").with_created_at(at(10)),
    ];
    assert_eq!(resolve_primary(&cluster).unwrap().external_id, "2");
  }

  #[test]
  fn primary_ties_go_to_first_encountered() {
    let cluster = [
      Profile::new("1"),
      Profile::new("2").with_created_at(at(20)),
      Profile::new("3").with_created_at(at(20)),
    ];
    assert_eq!(resolve_primary(&cluster).unwrap().external_id, "2");

    let undated = [Profile::new("a"), Profile::new("b")];
    assert_eq!(resolve_primary(&undated).unwrap().external_id, "a");
    assert!(resolve_primary(&[]).is_none());
  }

  #[test]
  fn most_complete_fills_missing_phone_from_duplicate() {
    let primary = Profile::new("2")
      .with_created_at(at(20))
      .with_attribute("email", "a@x.com");
    let dup = Profile::new("1")
      .with_created_at(at(15))
      .with_attribute("email", "a@x.com")
      .with_attribute("phone", "+1234567890");

    let merged = merge(&primary, &[dup], MergeStrategy::MostComplete);
    assert_eq!(merged.external_id, "2");
    assert_eq!(merged.attribute("phone"), Some(&FieldValue::from("+1234567890")));
  }

  #[test]
  fn most_complete_keeps_primary_values() {
    let primary = Profile::new("p").with_attribute("first_name", "Johnny");
    let dup = Profile::new("d")
      .with_created_at(at(25))
      .with_attribute("first_name", "John");
    let merged = merge(&primary, &[dup], MergeStrategy::MostComplete);
    assert_eq!(merged.attribute("first_name"), Some(&FieldValue::from("Johnny")));
  }

  #[test]
  fn most_recent_prefers_latest_contributor() {
    let primary = Profile::new("p")
      .with_created_at(at(10))
      .with_attribute("first_name", "John")
      .with_attribute("last_name", "Doe");
    let newer = Profile::new("d1")
      .with_created_at(at(20))
      .with_attribute("first_name", "Johnny")
      .with_attribute("last_name", "");
    let older = Profile::new("d2")
      .with_created_at(at(5))
      .with_attribute("city", "Leeds");

    let merged =
      merge(&primary, &[newer, older], MergeStrategy::MostRecent);
    assert_eq!(merged.attribute("first_name"), Some(&FieldValue::from("Johnny")));
    // An empty value never wins over a real one.
    assert_eq!(merged.attribute("last_name"), Some(&FieldValue::from("Doe")));
    assert_eq!(merged.attribute("city"), Some(&FieldValue::from("Leeds")));
    assert_eq!(merged.created_at, Some(at(10)));
  }

  #[test]
  fn key_shared_by_several_duplicates_resolves_once() {
    let primary = Profile::new("p").with_created_at(at(10));
    let first = Profile::new("d1")
      .with_created_at(at(12))
      .with_attribute("city", "Leeds");
    let second = Profile::new("d2")
      .with_created_at(at(20))
      .with_attribute("city", "York");
    let third = Profile::new("d3")
      .with_created_at(at(15))
      .with_attribute("city", "Hull");

    let merged =
      merge(&primary, &[first, second, third], MergeStrategy::MostRecent);
    assert_eq!(merged.attribute("city"), Some(&FieldValue::from("York")));
    assert_eq!(merged.attributes.len(), 1);
  }

  #[test]
  fn reserved_keys_are_not_resolved() {
    let primary = Profile::new("p").with_channel("website");
    let dup = Profile::new("d")
      .with_channel("facebook")
      .with_created_at(at(30))
      .with_attribute(HISTORY_ATTRIBUTE, "old");
    let merged = merge(&primary, &[dup], MergeStrategy::MostRecent);
    assert_eq!(merged.channel.as_deref(), Some("website"));
    assert!(merged.attribute(HISTORY_ATTRIBUTE).is_none());
  }

  #[test]
  fn strategy_parses_from_wire_names() {
    assert_eq!("most_complete".parse::<MergeStrategy>().unwrap(), MergeStrategy::MostComplete);
    assert!("newest".parse::<MergeStrategy>().is_err());
  }
}
