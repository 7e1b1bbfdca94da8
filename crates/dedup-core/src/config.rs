//! Deduplication configuration singleton.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  matcher::DEFAULT_MATCHING_FIELDS,
  merge::MergeStrategy,
  profile::is_reserved,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationConfig {
  /// Attribute names compared by the matcher, in priority order.
  pub matching_fields:      Vec<String>,
  pub merge_strategy:       MergeStrategy,
  /// Whether profile-created webhooks merge matches automatically.
  pub auto_merge_enabled:   bool,
  /// Minimum confidence for a cluster to be reported or merged.
  pub confidence_threshold: f64,
  pub webhook_url:          Option<String>,
  /// `None` until a configuration has been stored.
  pub updated_at:           Option<DateTime<Utc>>,
}

impl Default for DeduplicationConfig {
  fn default() -> Self {
    Self {
      matching_fields:      DEFAULT_MATCHING_FIELDS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      merge_strategy:       MergeStrategy::default(),
      auto_merge_enabled:   true,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      webhook_url:          None,
      updated_at:           None,
    }
  }
}

/// A replacement configuration. Omitted fields take their default values
/// rather than keeping the stored ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
  pub matching_fields:      Option<Vec<String>>,
  pub merge_strategy:       Option<MergeStrategy>,
  pub auto_merge_enabled:   Option<bool>,
  pub confidence_threshold: Option<f64>,
  pub webhook_url:          Option<String>,
}

impl ConfigUpdate {
  /// Resolve against the defaults and validate.
  pub fn into_config(self, now: DateTime<Utc>) -> Result<DeduplicationConfig> {
    let defaults = DeduplicationConfig::default();
    let config = DeduplicationConfig {
      matching_fields:      self
        .matching_fields
        .unwrap_or(defaults.matching_fields),
      merge_strategy:       self
        .merge_strategy
        .unwrap_or(defaults.merge_strategy),
      auto_merge_enabled:   self
        .auto_merge_enabled
        .unwrap_or(defaults.auto_merge_enabled),
      confidence_threshold: self
        .confidence_threshold
        .unwrap_or(defaults.confidence_threshold),
      webhook_url:          self.webhook_url.filter(|u| !u.trim().is_empty()),
      updated_at:           Some(now),
    };
    config.validate()?;
    Ok(config)
  }
}

impl DeduplicationConfig {
  pub fn validate(&self) -> Result<()> {
    if self.matching_fields.is_empty() {
      return Err(Error::Validation(
        "matching_fields must name at least one attribute".into(),
      ));
    }
    for (i, field) in self.matching_fields.iter().enumerate() {
      if field.trim().is_empty() {
        return Err(Error::Validation("matching field names cannot be empty".into()));
      }
      if is_reserved(field) {
        return Err(Error::Validation(format!(
          "{field:?} is reserved and cannot be used as a matching field"
        )));
      }
      if self.matching_fields[..i].contains(field) {
        return Err(Error::Validation(format!(
          "matching field {field:?} is listed twice"
        )));
      }
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(Error::Validation(format!(
        "confidence_threshold must be within [0, 1], got {}",
        self.confidence_threshold
      )));
    }
    Ok(())
  }
}
