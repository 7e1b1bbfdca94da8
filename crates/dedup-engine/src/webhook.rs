//! Profile lifecycle notifications from the CRM.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dedup_core::{
  matcher::shared_fields,
  profile::Profile,
  remote::{ProfileFilter, ProfileStore},
  store::{ConfigStore, MergeLedger},
};

use crate::{Engine, Result, merge::MergeRequest};

/// Notification body: `{"events": [{"user": {...}}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
  #[serde(default)]
  pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
  pub user: Option<Profile>,
}

impl WebhookPayload {
  pub fn users(self) -> impl Iterator<Item = Profile> {
    self.events.into_iter().filter_map(|e| e.user)
  }
}

/// What happened to one created profile.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResult {
  pub user_id:            String,
  pub duplicates_found:   usize,
  pub auto_merged:        bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub merge_operation_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:              Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
  pub auto_merge_enabled: bool,
  pub results:            Vec<WebhookResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateAck {
  pub user_ids: Vec<String>,
}

impl<P, L> Engine<P, L>
where
  P: ProfileStore,
  L: MergeLedger + ConfigStore,
{
  /// Merge existing profiles sharing a matching field into each newly
  /// created profile, when auto-merge is enabled.
  ///
  /// A failure for one profile is reported in its result and does not stop
  /// the others.
  pub async fn profile_created(
    &self,
    payload: WebhookPayload,
  ) -> Result<WebhookOutcome> {
    let config = self.config().await?;
    if !config.auto_merge_enabled {
      info!("profile-created webhook ignored; auto-merge disabled");
      return Ok(WebhookOutcome { auto_merge_enabled: false, results: vec![] });
    }

    let mut results = Vec::new();
    for user in payload.users() {
      let user_id = user.external_id.clone();
      let result = match self.auto_merge(&user, &config.matching_fields).await {
        Ok((duplicates_found, merge_operation_id)) => WebhookResult {
          user_id,
          duplicates_found,
          auto_merged: merge_operation_id.is_some(),
          merge_operation_id,
          error: None,
        },
        Err(e) => {
          warn!(user = %user_id, error = %e, "webhook auto-merge failed");
          WebhookResult {
            user_id,
            duplicates_found: 0,
            auto_merged: false,
            merge_operation_id: None,
            error: Some(e.to_string()),
          }
        }
      };
      results.push(result);
    }

    Ok(WebhookOutcome { auto_merge_enabled: true, results })
  }

  async fn auto_merge(
    &self,
    user: &Profile,
    fields: &[String],
  ) -> Result<(usize, Option<i64>)> {
    let profiles = self
      .remote(
        "export",
        self.profiles.export(ProfileFilter {
          limit: Some(self.options.export_batch_size),
          ..Default::default()
        }),
      )
      .await?;

    let duplicates: Vec<String> = profiles
      .iter()
      .filter(|p| p.external_id != user.external_id)
      .filter(|p| !shared_fields(user, p, fields).is_empty())
      .map(|p| p.external_id.clone())
      .collect();
    if duplicates.is_empty() {
      return Ok((0, None));
    }

    let found = duplicates.len();
    let outcome = self
      .merge(MergeRequest::new(user.external_id.clone(), duplicates))
      .await?;
    Ok((found, Some(outcome.merge_operation_id)))
  }

  /// Acknowledge profile updates. Updates never trigger merges.
  pub fn profile_updated(&self, payload: WebhookPayload) -> UpdateAck {
    let user_ids: Vec<String> =
      payload.users().map(|u| u.external_id).collect();
    info!(users = ?user_ids, "profile-updated webhook acknowledged");
    UpdateAck { user_ids }
  }
}
