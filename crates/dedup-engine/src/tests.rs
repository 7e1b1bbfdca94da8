//! End-to-end engine tests against the in-memory profile store and an
//! in-memory SQLite ledger.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use dedup_core::{
  config::ConfigUpdate,
  diff::DeduplicationHistory,
  merge::MergeStrategy,
  operation::{OperationQuery, OperationStatus},
  profile::{FieldValue, HISTORY_ATTRIBUTE, Profile},
};
use dedup_remote::MemoryProfileStore;
use dedup_store_sqlite::SqliteStore;

use crate::{
  Engine, EngineOptions, ErrorKind,
  merge::MergeRequest,
  scan::{PotentialQuery, ScanRequest},
  unmerge::UnmergeRequest,
  webhook::WebhookPayload,
};

type TestEngine = Engine<MemoryProfileStore, SqliteStore>;

fn profile_1() -> Profile {
  Profile::new("1")
    .with_channel("website")
    .with_created_at(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
    .with_attribute("email", "a@x.com")
    .with_attribute("first_name", "John")
    .with_attribute("phone", "+15550100")
}

fn profile_2() -> Profile {
  Profile::new("2")
    .with_channel("facebook")
    .with_created_at(Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap())
    .with_attribute("email", "a@x.com")
    .with_attribute("first_name", "Johnny")
}

fn profile_3() -> Profile {
  Profile::new("3")
    .with_channel("website")
    .with_attribute("email", "other@x.com")
}

async fn engine_with(profiles: Vec<Profile>, options: EngineOptions) -> TestEngine {
  let ledger = SqliteStore::open_in_memory().await.unwrap();
  Engine::new(MemoryProfileStore::with_profiles(profiles), ledger, options)
}

async fn engine() -> TestEngine {
  engine_with(
    vec![profile_1(), profile_2(), profile_3()],
    EngineOptions::default(),
  )
  .await
}

async fn total_operations(engine: &TestEngine) -> u64 {
  engine
    .list_operations(OperationQuery::default())
    .await
    .unwrap()
    .total
}

fn history_of(profile: &Profile) -> DeduplicationHistory {
  profile
    .attribute(HISTORY_ATTRIBUTE)
    .unwrap()
    .to_deserialize()
    .unwrap()
}

// ─── Scan ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dry_run_scan_reports_one_cluster() {
  let e = engine().await;
  let report = e.scan(ScanRequest::default()).await.unwrap();

  assert!(report.dry_run);
  assert_eq!(report.total_users_scanned, 3);
  assert_eq!(report.groups_found, 1);
  let candidate = &report.candidate_merges[0];
  assert_eq!(candidate.primary_user.external_id, "2");
  assert_eq!(candidate.duplicate_ids(), ["1"]);
  assert_eq!(candidate.matching_fields, ["email"]);
  assert!(report.merges.is_empty());

  // Read-only.
  assert_eq!(e.profiles().snapshot().await.len(), 3);
  assert_eq!(total_operations(&e).await, 0);
}

#[tokio::test]
async fn scan_batch_size_bounds_the_working_set() {
  let e = engine().await;
  let report = e
    .scan(ScanRequest { batch_size: Some(1), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(report.total_users_scanned, 1);
  assert_eq!(report.groups_found, 0);

  for bad in [0, 10_001] {
    let err = e
      .scan(ScanRequest { batch_size: Some(bad), ..Default::default() })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }
}

#[tokio::test]
async fn applied_scan_merges_candidates() {
  let e = engine().await;
  let report = e
    .scan(ScanRequest { dry_run: false, ..Default::default() })
    .await
    .unwrap();

  assert_eq!(report.merges.len(), 1);
  assert_eq!(report.merges[0].primary_user_id, "2");
  assert!(report.merges[0].merge_operation_id.is_some());
  assert!(e.profiles().get("1").await.is_none());
  assert_eq!(total_operations(&e).await, 1);
}

#[tokio::test]
async fn applied_scan_respects_confidence_threshold() {
  let e = engine().await;
  e.update_config(ConfigUpdate {
    confidence_threshold: Some(0.99),
    ..Default::default()
  })
  .await
  .unwrap();

  let report = e
    .scan(ScanRequest { dry_run: false, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(report.groups_found, 1);
  assert!(report.merges.is_empty());
  assert_eq!(total_operations(&e).await, 0);
}

// ─── Merge and unmerge ───────────────────────────────────────────────────────

#[tokio::test]
async fn merge_records_operation_and_applies_remotely() {
  let e = engine().await;
  let outcome = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();

  assert!(!outcome.replayed);
  assert_eq!(outcome.merged_user_ids, ["1"]);
  assert_eq!(outcome.merge_strategy, MergeStrategy::MostRecent);
  assert_eq!(outcome.channels_preserved, ["facebook", "website"]);

  let detail = e.get_operation(outcome.merge_operation_id).await.unwrap();
  assert!(detail.can_unmerge);
  assert_eq!(detail.operation.status, OperationStatus::Completed);
  assert_eq!(detail.operation.merged_user_ids, ["1"]);
  assert_eq!(detail.user_diffs.len(), 1);
  let user_diff = &detail.user_diffs[0];
  assert_eq!(user_diff.user_id, "1");
  assert_eq!(user_diff.channel_name, "website");
  assert_eq!(user_diff.original_data, profile_1().to_record().unwrap());

  // Remote: duplicate gone, primary canonical with history attached.
  assert!(e.profiles().get("1").await.is_none());
  let primary = e.profiles().get("2").await.unwrap();
  assert_eq!(primary.attribute("first_name"), Some(&FieldValue::from("Johnny")));
  assert_eq!(primary.attribute("phone"), Some(&FieldValue::from("+15550100")));
  let history = history_of(&primary);
  assert_eq!(history.channels, ["facebook", "website"]);
  assert_eq!(history.merged_users.len(), 1);
  assert_eq!(history.merged_users[0].user_id, "1");
  assert_eq!(Some(&history), outcome.deduplication_history.as_ref());
}

#[tokio::test]
async fn unmerge_restores_absorbed_profile_exactly() {
  let e = engine().await;
  let op = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();

  let outcome = e
    .unmerge(UnmergeRequest::new(op.merge_operation_id))
    .await
    .unwrap();
  assert_eq!(outcome.primary_user_id, "2");
  assert_eq!(outcome.reverted_users, 1);
  assert_eq!(outcome.restored_user_ids, ["1"]);

  assert_eq!(e.profiles().get("1").await, Some(profile_1()));
  let primary = e.profiles().get("2").await.unwrap();
  assert_eq!(primary.attribute(HISTORY_ATTRIBUTE), None);

  let detail = e.get_operation(op.merge_operation_id).await.unwrap();
  assert_eq!(detail.operation.status, OperationStatus::Reverted);
  assert!(!detail.can_unmerge);
}

#[tokio::test]
async fn second_unmerge_is_a_conflict() {
  let e = engine().await;
  let op = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();
  e.unmerge(UnmergeRequest::new(op.merge_operation_id))
    .await
    .unwrap();

  let err = e
    .unmerge(UnmergeRequest::new(op.merge_operation_id))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn unmerge_unknown_operation_is_not_found() {
  let e = engine().await;
  let err = e.unmerge(UnmergeRequest::new(404)).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn unmerge_without_restore_only_marks_reverted() {
  let e = engine().await;
  let op = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();

  let outcome = e
    .unmerge(UnmergeRequest {
      merge_operation_id:     op.merge_operation_id,
      restore_original_users: false,
    })
    .await
    .unwrap();
  assert!(outcome.restored_user_ids.is_empty());
  assert_eq!(outcome.reverted_users, 1);
  assert!(e.profiles().get("1").await.is_none());

  let detail = e.get_operation(op.merge_operation_id).await.unwrap();
  assert_eq!(detail.operation.status, OperationStatus::Reverted);
}

#[tokio::test]
async fn failed_unmerge_leaves_operation_completed() {
  let e = engine().await;
  let op = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();

  e.profiles().set_fail_writes(true).await;
  let err = e
    .unmerge(UnmergeRequest::new(op.merge_operation_id))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Upstream);
  let detail = e.get_operation(op.merge_operation_id).await.unwrap();
  assert_eq!(detail.operation.status, OperationStatus::Completed);

  e.profiles().set_fail_writes(false).await;
  e.unmerge(UnmergeRequest::new(op.merge_operation_id))
    .await
    .unwrap();
  assert_eq!(e.profiles().get("1").await, Some(profile_1()));
}

#[tokio::test]
async fn most_complete_fills_missing_phone_from_duplicate() {
  let e = engine().await;
  e.merge(MergeRequest::new("2", ["1"]).with_strategy(MergeStrategy::MostComplete))
    .await
    .unwrap();

  let primary = e.profiles().get("2").await.unwrap();
  assert_eq!(primary.attribute("phone"), Some(&FieldValue::from("+15550100")));
  assert_eq!(primary.attribute("first_name"), Some(&FieldValue::from("Johnny")));
}

#[tokio::test]
async fn merge_without_preserved_channels_attaches_no_history() {
  let e = engine().await;
  let mut request = MergeRequest::new("2", ["1"]);
  request.preserve_channels = false;

  let outcome = e.merge(request).await.unwrap();
  assert!(outcome.channels_preserved.is_empty());
  assert!(outcome.deduplication_history.is_none());

  let primary = e.profiles().get("2").await.unwrap();
  assert_eq!(primary.attribute(HISTORY_ATTRIBUTE), None);
}

#[tokio::test]
async fn history_accumulates_across_merges() {
  let e = engine_with(
    vec![
      profile_1(),
      profile_2(),
      Profile::new("4")
        .with_channel("ios")
        .with_attribute("email", "a@x.com"),
    ],
    EngineOptions::default(),
  )
  .await;

  e.merge(MergeRequest::new("2", ["1"])).await.unwrap();
  let second = e.merge(MergeRequest::new("2", ["4"])).await.unwrap();

  assert_eq!(second.channels_preserved, ["facebook", "website", "ios"]);
  let history = history_of(&e.profiles().get("2").await.unwrap());
  let users: Vec<_> =
    history.merged_users.iter().map(|u| u.user_id.as_str()).collect();
  assert_eq!(users, ["1", "4"]);
}

#[tokio::test]
async fn history_grows_by_one_entry_per_merge() {
  let duplicates: Vec<Profile> = (10..16)
    .map(|n| {
      Profile::new(n.to_string())
        .with_channel(format!("channel-{n}"))
        .with_attribute("email", "a@x.com")
    })
    .collect();
  let mut profiles = vec![profile_2()];
  profiles.extend(duplicates.iter().cloned());
  let e = engine_with(profiles, EngineOptions::default()).await;

  let mut sizes = Vec::new();
  for (merged, duplicate) in duplicates.iter().enumerate() {
    e.merge(MergeRequest::new("2", [duplicate.external_id.clone()]))
      .await
      .unwrap();

    let primary = e.profiles().get("2").await.unwrap();
    let history = history_of(&primary);
    assert_eq!(history.merged_users.len(), merged + 1);
    assert!(
      history
        .merged_users
        .iter()
        .all(|entry| !entry.diff.contains_key(HISTORY_ATTRIBUTE))
    );
    let encoded =
      serde_json::to_string(primary.attribute(HISTORY_ATTRIBUTE).unwrap())
        .unwrap();
    sizes.push(encoded.len());
  }

  // Every merge adds one entry of about the same size.
  let steps: Vec<_> = sizes.windows(2).map(|w| w[1] - w[0]).collect();
  let (min, max) = (
    steps.iter().min().unwrap(),
    steps.iter().max().unwrap(),
  );
  assert!(max - min < 32, "history growth is not linear: {sizes:?}");
}

#[tokio::test]
async fn unmerge_keeps_history_of_earlier_merges() {
  let e = engine_with(
    vec![
      profile_1(),
      profile_2(),
      Profile::new("4")
        .with_channel("ios")
        .with_attribute("email", "a@x.com"),
    ],
    EngineOptions::default(),
  )
  .await;

  let first = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();
  let second = e.merge(MergeRequest::new("2", ["4"])).await.unwrap();
  e.unmerge(UnmergeRequest::new(second.merge_operation_id))
    .await
    .unwrap();

  let history = history_of(&e.profiles().get("2").await.unwrap());
  let users: Vec<_> =
    history.merged_users.iter().map(|u| u.user_id.as_str()).collect();
  assert_eq!(users, ["1"]);
  assert_eq!(history.channels, ["facebook", "website"]);

  let detail = e.get_operation(first.merge_operation_id).await.unwrap();
  assert_eq!(detail.operation.status, OperationStatus::Completed);
  assert!(detail.can_unmerge);
}

#[tokio::test]
async fn missing_primary_writes_nothing() {
  let e = engine().await;
  let err = e.merge(MergeRequest::new("missing", ["1"])).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert_eq!(total_operations(&e).await, 0);
  assert!(e.profiles().get("1").await.is_some());
}

#[tokio::test]
async fn missing_duplicate_writes_nothing() {
  let e = engine().await;
  let err = e
    .merge(MergeRequest::new("2", ["1", "missing"]))
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert_eq!(total_operations(&e).await, 0);
  assert_eq!(e.profiles().snapshot().await.len(), 3);
}

#[tokio::test]
async fn invalid_merge_request_is_rejected() {
  let e = engine().await;
  let err = e.merge(MergeRequest::new("2", ["2"])).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

// ─── Remote failures and reapply ─────────────────────────────────────────────

#[tokio::test]
async fn remote_timeout_leaves_operation_completed_and_reapply_finishes() {
  let e = engine_with(vec![profile_1(), profile_2()], EngineOptions {
    remote_timeout: Duration::from_millis(50),
    ..Default::default()
  })
  .await;
  e.profiles()
    .set_write_latency(Some(Duration::from_millis(500)))
    .await;

  let err = e.merge(MergeRequest::new("2", ["1"])).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Upstream);

  let page = e.list_operations(OperationQuery::default()).await.unwrap();
  assert_eq!(page.total, 1);
  let op = &page.operations[0];
  assert_eq!(op.status, OperationStatus::Completed);
  assert!(e.profiles().get("1").await.is_some());

  e.profiles().set_write_latency(None).await;
  let outcome = e.reapply(op.id).await.unwrap();
  assert!(outcome.replayed);
  assert_eq!(outcome.channels_preserved, ["facebook", "website"]);
  assert!(e.profiles().get("1").await.is_none());
  let history = history_of(&e.profiles().get("2").await.unwrap());
  assert_eq!(history.merged_users[0].user_id, "1");
}

#[tokio::test]
async fn reapply_is_repeatable() {
  let e = engine().await;
  let op = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();
  let before = e.profiles().snapshot().await;

  e.reapply(op.merge_operation_id).await.unwrap();
  e.reapply(op.merge_operation_id).await.unwrap();
  assert_eq!(e.profiles().snapshot().await, before);
}

#[tokio::test]
async fn reapply_of_reverted_operation_is_a_conflict() {
  let e = engine().await;
  let op = e.merge(MergeRequest::new("2", ["1"])).await.unwrap();
  e.unmerge(UnmergeRequest::new(op.merge_operation_id))
    .await
    .unwrap();

  let err = e.reapply(op.merge_operation_id).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
  // The restored profile stays.
  assert!(e.profiles().get("1").await.is_some());
}

// ─── Idempotency and concurrency ─────────────────────────────────────────────

#[tokio::test]
async fn idempotency_key_replays_first_outcome() {
  let e = engine().await;
  let first = e
    .merge(MergeRequest::new("2", ["1"]).with_idempotency_key("req-1"))
    .await
    .unwrap();
  let second = e
    .merge(MergeRequest::new("2", ["1"]).with_idempotency_key("req-1"))
    .await
    .unwrap();

  assert!(!first.replayed);
  assert!(second.replayed);
  assert_eq!(second.merge_operation_id, first.merge_operation_id);
  assert_eq!(second.deduplication_history, first.deduplication_history);
  assert_eq!(total_operations(&e).await, 1);
}

#[tokio::test]
async fn idempotency_key_reused_for_other_profiles_is_a_conflict() {
  let e = engine().await;
  e.merge(MergeRequest::new("2", ["1"]).with_idempotency_key("req-1"))
    .await
    .unwrap();

  let err = e
    .merge(MergeRequest::new("2", ["3"]).with_idempotency_key("req-1"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);

  let err = e
    .merge(MergeRequest::new("3", ["1"]).with_idempotency_key("req-1"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);

  assert_eq!(total_operations(&e).await, 1);
  assert!(e.profiles().get("3").await.is_some());
}

#[tokio::test]
async fn overlapping_merges_are_serialized() {
  let e = engine().await;
  let (a, b) = tokio::join!(
    e.merge(MergeRequest::new("2", ["1"])),
    e.merge(MergeRequest::new("2", ["1"])),
  );

  // Whichever runs second finds the duplicate already absorbed.
  assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
  let err = a.err().or(b.err()).unwrap();
  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert_eq!(total_operations(&e).await, 1);
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn potential_duplicates_filters_and_limits() {
  let e = engine().await;

  let report = e.potential_duplicates(PotentialQuery::default()).await.unwrap();
  assert_eq!(report.total_groups, 1);
  assert_eq!(report.confidence_threshold, 0.8);
  assert_eq!(report.potential_duplicates[0].suggested_primary.external_id, "2");
  assert_eq!(report.potential_duplicates[0].users.len(), 2);

  let by_phone = e
    .potential_duplicates(PotentialQuery {
      matching_field: Some("phone".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(by_phone.total_groups, 0);

  let strict = e
    .potential_duplicates(PotentialQuery {
      confidence_threshold: Some(0.99),
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(strict.potential_duplicates.is_empty());

  let err = e
    .potential_duplicates(PotentialQuery {
      confidence_threshold: Some(1.5),
      ..Default::default()
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn operation_listing_validates_paging() {
  let e = engine().await;
  let err = e
    .list_operations(OperationQuery { limit: 0, ..Default::default() })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);

  let err = e.get_operation(1).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[tokio::test]
async fn config_defaults_then_replaced() {
  let e = engine().await;
  let config = e.config().await.unwrap();
  assert_eq!(config.matching_fields, ["email", "phone", "device_id"]);
  assert!(config.updated_at.is_none());

  let updated = e
    .update_config(ConfigUpdate {
      matching_fields: Some(vec!["phone".into()]),
      merge_strategy: Some(MergeStrategy::MostComplete),
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(updated.updated_at.is_some());
  assert_eq!(e.config().await.unwrap(), updated);

  // Phone only: profiles 1 and 2 no longer match.
  let report = e.scan(ScanRequest::default()).await.unwrap();
  assert_eq!(report.groups_found, 0);

  let err = e
    .update_config(ConfigUpdate {
      matching_fields: Some(vec!["external_id".into()]),
      ..Default::default()
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn health_reports_ledger() {
  let e = engine().await;
  let report = e.health().await.unwrap();
  assert_eq!(report.status, "healthy");
}

// ─── Webhooks ────────────────────────────────────────────────────────────────

fn created(user: &Profile) -> WebhookPayload {
  serde_json::from_value(serde_json::json!({
    "events": [{ "user": user }]
  }))
  .unwrap()
}

#[tokio::test]
async fn created_profile_absorbs_matching_profiles() {
  let newcomer = Profile::new("9")
    .with_channel("ios")
    .with_attribute("email", "other@x.com");
  let e = engine_with(
    vec![profile_1(), profile_3(), newcomer.clone()],
    EngineOptions::default(),
  )
  .await;

  let outcome = e.profile_created(created(&newcomer)).await.unwrap();
  assert!(outcome.auto_merge_enabled);
  let result = &outcome.results[0];
  assert_eq!(result.user_id, "9");
  assert_eq!(result.duplicates_found, 1);
  assert!(result.auto_merged);

  assert!(e.profiles().get("3").await.is_none());
  assert!(e.profiles().get("1").await.is_some());
  let detail = e
    .get_operation(result.merge_operation_id.unwrap())
    .await
    .unwrap();
  assert_eq!(detail.operation.primary_user_id, "9");
  assert_eq!(detail.operation.merged_user_ids, ["3"]);
}

#[tokio::test]
async fn created_profile_without_matches_is_not_merged() {
  let loner = Profile::new("9").with_attribute("email", "solo@x.com");
  let e = engine_with(vec![profile_1(), loner.clone()], EngineOptions::default()).await;

  let outcome = e.profile_created(created(&loner)).await.unwrap();
  assert_eq!(outcome.results[0].duplicates_found, 0);
  assert!(!outcome.results[0].auto_merged);
  assert_eq!(total_operations(&e).await, 0);
}

#[tokio::test]
async fn disabled_auto_merge_ignores_created_profiles() {
  let e = engine().await;
  e.update_config(ConfigUpdate {
    auto_merge_enabled: Some(false),
    ..Default::default()
  })
  .await
  .unwrap();

  let outcome = e.profile_created(created(&profile_2())).await.unwrap();
  assert!(!outcome.auto_merge_enabled);
  assert!(outcome.results.is_empty());
  assert_eq!(total_operations(&e).await, 0);
}

#[tokio::test]
async fn webhook_failure_for_one_profile_does_not_block_others() {
  let ghost = Profile::new("ghost").with_attribute("email", "a@x.com");
  let e = engine().await;
  let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
    "events": [{ "user": ghost }, { "user": profile_3() }, {}]
  }))
  .unwrap();

  let outcome = e.profile_created(payload).await.unwrap();
  assert_eq!(outcome.results.len(), 2);
  // "ghost" matches 1 and 2 but does not exist remotely.
  assert!(outcome.results[0].error.is_some());
  assert!(!outcome.results[0].auto_merged);
  assert_eq!(outcome.results[1].duplicates_found, 0);
}

#[tokio::test]
async fn updated_profiles_are_acknowledged() {
  let e = engine().await;
  let ack = e.profile_updated(created(&profile_1()));
  assert_eq!(ack.user_ids, ["1"]);
  assert_eq!(total_operations(&e).await, 0);
}
