//! Duplicate matcher: groups profiles into duplicate clusters.
//!
//! Clustering is single-linkage anchored on the first-seen member of each
//! group. A profile is marked processed as soon as it joins a cluster, so it
//! never anchors or extends a later cluster. This is not a transitive
//! closure: if `q` joins `p`'s cluster and `q` also shares an
//! attribute with `r`, but `r` shares nothing with `p`, then `r` is not
//! pulled into the cluster.

use std::collections::HashSet;

use serde::Serialize;

use crate::profile::Profile;

/// Confidence attached to every cluster discovered by a scan. Matching is
/// exact on identity attributes, so this is a policy constant rather than a
/// computed score.
pub const MATCH_CONFIDENCE: f64 = 0.95;

/// Matching fields used when no configuration has been stored.
pub const DEFAULT_MATCHING_FIELDS: &[&str] = &["email", "phone", "device_id"];

/// Profiles judged equivalent by at least one shared identity attribute.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCluster {
  /// Anchor first, then the remaining members in encounter order.
  pub members:        Vec<Profile>,
  /// Matching fields on which some member matched the anchor, in
  /// configuration order.
  pub matched_fields: Vec<String>,
}

impl DuplicateCluster {
  pub fn anchor(&self) -> &Profile { &self.members[0] }

  pub fn len(&self) -> usize { self.members.len() }

  pub fn is_empty(&self) -> bool { self.members.is_empty() }
}

/// The matching fields on which `a` and `b` carry the same non-empty value.
pub fn shared_fields<'f>(
  a: &Profile,
  b: &Profile,
  fields: &'f [String],
) -> Vec<&'f str> {
  fields
    .iter()
    .filter(|f| match (a.present(f), b.present(f)) {
      (Some(x), Some(y)) => x == y,
      _ => false,
    })
    .map(String::as_str)
    .collect()
}

/// Group `profiles` into duplicate clusters on `fields`.
///
/// Clusters are returned in order of their anchor's position in the input.
/// Profiles that match nobody are dropped.
pub fn find_duplicates(
  profiles: &[Profile],
  fields: &[String],
) -> Vec<DuplicateCluster> {
  let mut processed: HashSet<&str> = HashSet::new();
  let mut clusters = Vec::new();

  for (i, anchor) in profiles.iter().enumerate() {
    if !processed.insert(anchor.external_id.as_str()) {
      continue;
    }

    let mut members = vec![anchor.clone()];
    let mut matched: HashSet<&str> = HashSet::new();

    for candidate in &profiles[i + 1..] {
      if processed.contains(candidate.external_id.as_str()) {
        continue;
      }
      let shared = shared_fields(anchor, candidate, fields);
      if shared.is_empty() {
        continue;
      }
      matched.extend(shared);
      processed.insert(candidate.external_id.as_str());
      members.push(candidate.clone());
    }

    if members.len() > 1 {
      let matched_fields = fields
        .iter()
        .filter(|f| matched.contains(f.as_str()))
        .cloned()
        .collect();
      clusters.push(DuplicateCluster { members, matched_fields });
    }
  }

  clusters
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fields() -> Vec<String> {
    DEFAULT_MATCHING_FIELDS.iter().map(|s| s.to_string()).collect()
  }

  fn profile(id: &str, attrs: &[(&str, &str)]) -> Profile {
    attrs
      .iter()
      .fold(Profile::new(id), |p, (k, v)| p.with_attribute(*k, *v))
  }

  fn ids(cluster: &DuplicateCluster) -> Vec<&str> {
    cluster.members.iter().map(|p| p.external_id.as_str()).collect()
  }

  #[test]
  fn shared_email_forms_one_cluster_in_either_order() {
    let a = profile("1", &[("email", "a@x.com")]);
    let b = profile("2", &[("email", "a@x.com"), ("phone", "+44")]);

    let forward = find_duplicates(&[a.clone(), b.clone()], &fields());
    assert_eq!(forward.len(), 1);
    assert_eq!(ids(&forward[0]), ["1", "2"]);
    assert_eq!(forward[0].matched_fields, ["email"]);

    let backward = find_duplicates(&[b, a], &fields());
    assert_eq!(backward.len(), 1);
    assert_eq!(ids(&backward[0]), ["2", "1"]);
  }

  #[test]
  fn unrelated_profile_is_never_clustered() {
    let profiles = [
      profile("1", &[("email", "a@x.com")]),
      profile("2", &[("phone", "+1")]),
      profile("3", &[("email", "a@x.com"), ("device_id", "d-9")]),
    ];
    let clusters = find_duplicates(&profiles, &fields());
    assert_eq!(clusters.len(), 1);
    assert_eq!(ids(&clusters[0]), ["1", "3"]);
  }

  #[test]
  fn missing_and_empty_values_do_not_match() {
    let profiles = [
      profile("1", &[("email", "")]),
      profile("2", &[("email", "")]),
      profile("3", &[]),
      profile("4", &[]),
    ];
    assert!(find_duplicates(&profiles, &fields()).is_empty());
  }

  #[test]
  fn clustering_is_anchored_not_transitive() {
    // 2 matches anchor 1 on email; 3 only matches 2 on phone.
    let profiles = [
      profile("1", &[("email", "a@x.com"), ("phone", "+1")]),
      profile("2", &[("email", "a@x.com"), ("phone", "+2")]),
      profile("3", &[("email", "c@x.com"), ("phone", "+2")]),
    ];
    let clusters = find_duplicates(&profiles, &fields());
    assert_eq!(clusters.len(), 1);
    assert_eq!(ids(&clusters[0]), ["1", "2"]);
  }

  #[test]
  fn clusters_follow_anchor_order() {
    let profiles = [
      profile("a1", &[("phone", "+1")]),
      profile("b1", &[("email", "b@x.com")]),
      profile("a2", &[("phone", "+1")]),
      profile("b2", &[("email", "b@x.com")]),
    ];
    let clusters = find_duplicates(&profiles, &fields());
    assert_eq!(clusters.len(), 2);
    assert_eq!(ids(&clusters[0]), ["a1", "a2"]);
    assert_eq!(ids(&clusters[1]), ["b1", "b2"]);
    assert_eq!(clusters[0].matched_fields, ["phone"]);
  }

  #[test]
  fn only_configured_fields_are_compared() {
    let profiles = [
      profile("1", &[("email", "a@x.com"), ("device_id", "d")]),
      profile("2", &[("email", "b@x.com"), ("device_id", "d")]),
    ];
    let email_only = vec!["email".to_string()];
    assert!(find_duplicates(&profiles, &email_only).is_empty());
    assert_eq!(find_duplicates(&profiles, &fields()).len(), 1);
  }
}
