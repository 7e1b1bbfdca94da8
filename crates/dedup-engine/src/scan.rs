//! Batch duplicate discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dedup_core::{
  matcher::{DuplicateCluster, MATCH_CONFIDENCE, find_duplicates},
  merge::resolve_primary,
  profile::Profile,
  remote::{ProfileFilter, ProfileStore},
  store::{ConfigStore, MergeLedger},
};

use crate::{Engine, Error, Result, merge::MergeRequest};

pub const DEFAULT_SCAN_BATCH_SIZE: u32 = 100;
pub const MAX_SCAN_BATCH_SIZE: u32 = 10_000;
pub const DEFAULT_POTENTIAL_LIMIT: usize = 50;

fn default_true() -> bool { true }

/// Restricts the profiles a scan exports.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanFilters {
  pub channel:        Option<String>,
  pub created_after:  Option<DateTime<Utc>>,
  pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
  /// Report candidates without merging anything.
  #[serde(default = "default_true")]
  pub dry_run:    bool,
  /// Profiles exported for this scan.
  #[serde(default)]
  pub batch_size: Option<u32>,
  #[serde(default)]
  pub filters:    ScanFilters,
}

impl Default for ScanRequest {
  fn default() -> Self {
    Self { dry_run: true, batch_size: None, filters: ScanFilters::default() }
  }
}

/// A cluster as a proposed merge.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateMerge {
  pub primary_user:    Profile,
  pub duplicates:      Vec<Profile>,
  pub confidence:      f64,
  pub matching_fields: Vec<String>,
}

impl CandidateMerge {
  fn from_cluster(cluster: DuplicateCluster) -> Self {
    let primary_index = resolve_primary(&cluster.members)
      .and_then(|p| {
        cluster
          .members
          .iter()
          .position(|m| m.external_id == p.external_id)
      })
      .unwrap_or(0);
    let mut duplicates = cluster.members;
    let primary_user = duplicates.remove(primary_index);
    Self {
      primary_user,
      duplicates,
      confidence: MATCH_CONFIDENCE,
      matching_fields: cluster.matched_fields,
    }
  }

  pub fn duplicate_ids(&self) -> Vec<String> {
    self.duplicates.iter().map(|p| p.external_id.clone()).collect()
  }
}

/// What happened to one candidate when a scan merges.
#[derive(Debug, Clone, Serialize)]
pub struct ScanMergeResult {
  pub primary_user_id:    String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub merge_operation_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:              Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
  pub dry_run:             bool,
  pub total_users_scanned: usize,
  pub groups_found:        usize,
  pub candidate_merges:    Vec<CandidateMerge>,
  /// Empty on a dry run.
  pub merges:              Vec<ScanMergeResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PotentialQuery {
  pub confidence_threshold: Option<f64>,
  pub limit:                Option<usize>,
  /// Only clusters that matched on this field.
  pub matching_field:       Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PotentialDuplicate {
  pub users:             Vec<Profile>,
  pub confidence:        f64,
  pub matching_fields:   Vec<String>,
  pub suggested_primary: Profile,
}

#[derive(Debug, Clone, Serialize)]
pub struct PotentialReport {
  pub potential_duplicates: Vec<PotentialDuplicate>,
  pub total_groups:         usize,
  pub confidence_threshold: f64,
}

impl<P, L> Engine<P, L>
where
  P: ProfileStore,
  L: MergeLedger + ConfigStore,
{
  /// Export a batch of profiles and cluster them on the configured matching
  /// fields. Unless `dry_run`, merge every candidate whose confidence meets
  /// the configured threshold.
  pub async fn scan(&self, request: ScanRequest) -> Result<ScanReport> {
    let batch_size = request.batch_size.unwrap_or(DEFAULT_SCAN_BATCH_SIZE);
    if !(1..=MAX_SCAN_BATCH_SIZE).contains(&batch_size) {
      return Err(Error::Validation(format!(
        "batch_size must be between 1 and {MAX_SCAN_BATCH_SIZE}"
      )));
    }
    let config = self.config().await?;

    let profiles = self
      .remote(
        "export",
        self.profiles.export(ProfileFilter {
          channel: request.filters.channel,
          created_after: request.filters.created_after,
          created_before: request.filters.created_before,
          limit: Some(batch_size as usize),
          ..Default::default()
        }),
      )
      .await?;

    let candidates: Vec<CandidateMerge> =
      find_duplicates(&profiles, &config.matching_fields)
        .into_iter()
        .map(CandidateMerge::from_cluster)
        .collect();
    debug!(
      scanned = profiles.len(),
      groups = candidates.len(),
      dry_run = request.dry_run,
      "scan clustered profiles"
    );

    let mut merges = Vec::new();
    if !request.dry_run {
      for candidate in candidates
        .iter()
        .filter(|c| c.confidence >= config.confidence_threshold)
      {
        let primary_user_id = candidate.primary_user.external_id.clone();
        let outcome = self
          .merge(
            MergeRequest::new(primary_user_id.clone(), candidate.duplicate_ids())
              .with_strategy(config.merge_strategy),
          )
          .await;
        merges.push(match outcome {
          Ok(outcome) => ScanMergeResult {
            primary_user_id,
            merge_operation_id: Some(outcome.merge_operation_id),
            error: None,
          },
          Err(e) => {
            warn!(primary = %primary_user_id, error = %e, "scan merge failed");
            ScanMergeResult {
              primary_user_id,
              merge_operation_id: None,
              error: Some(e.to_string()),
            }
          }
        });
      }
      info!(
        candidates = candidates.len(),
        merged = merges.iter().filter(|m| m.error.is_none()).count(),
        "scan applied merges"
      );
    }

    Ok(ScanReport {
      dry_run: request.dry_run,
      total_users_scanned: profiles.len(),
      groups_found: candidates.len(),
      candidate_merges: candidates,
      merges,
    })
  }

  /// Clusters worth reviewing, without merging anything.
  pub async fn potential_duplicates(
    &self,
    query: PotentialQuery,
  ) -> Result<PotentialReport> {
    let config = self.config().await?;
    let threshold = query
      .confidence_threshold
      .unwrap_or(config.confidence_threshold);
    if !(0.0..=1.0).contains(&threshold) {
      return Err(Error::Validation(
        "confidence_threshold must be within [0, 1]".into(),
      ));
    }
    let limit = query.limit.unwrap_or(DEFAULT_POTENTIAL_LIMIT);
    if limit == 0 {
      return Err(Error::Validation("limit must be at least 1".into()));
    }

    let profiles = self
      .remote(
        "export",
        self.profiles.export(ProfileFilter {
          limit: Some(self.options.export_batch_size),
          ..Default::default()
        }),
      )
      .await?;

    let potential_duplicates: Vec<PotentialDuplicate> =
      find_duplicates(&profiles, &config.matching_fields)
        .into_iter()
        .filter(|c| {
          query
            .matching_field
            .as_ref()
            .is_none_or(|f| c.matched_fields.contains(f))
        })
        .filter(|_| MATCH_CONFIDENCE >= threshold)
        .take(limit)
        .map(|cluster| {
          let candidate = CandidateMerge::from_cluster(cluster.clone());
          PotentialDuplicate {
            users:             cluster.members,
            confidence:        candidate.confidence,
            matching_fields:   candidate.matching_fields,
            suggested_primary: candidate.primary_user,
          }
        })
        .collect();

    Ok(PotentialReport {
      total_groups: potential_duplicates.len(),
      potential_duplicates,
      confidence_threshold: threshold,
    })
  }
}
