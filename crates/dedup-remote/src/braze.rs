//! HTTP client for the CRM vendor's user REST API.

use std::time::Duration;

use dedup_core::{
  profile::{Profile, Record},
  remote::{ProfileFilter, ProfileStore},
};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{Error, Result};

/// Connection settings for the vendor API.
#[derive(Debug, Clone)]
pub struct BrazeConfig {
  /// REST endpoint root, e.g. `https://rest.iad-01.braze.com`.
  pub api_url: String,
  pub api_key: String,
  /// Client-level request timeout.
  pub timeout: Duration,
}

/// Async HTTP client implementing [`ProfileStore`] against the vendor API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct BrazeClient {
  client: Client,
  config: BrazeConfig,
}

#[derive(Deserialize)]
struct ExportResponse {
  #[serde(default)]
  users: Vec<Profile>,
}

#[derive(Serialize)]
struct TrackRequest<'a> {
  attributes: &'a [Record],
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
  external_ids: &'a [String],
}

#[derive(Deserialize)]
struct DeleteResponse {
  #[serde(default)]
  deleted: usize,
}

impl BrazeClient {
  pub fn new(config: BrazeConfig) -> Result<Self> {
    let client = Client::builder().timeout(config.timeout).build()?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
  }

  /// `POST <path>` with a JSON body, decoding a JSON response.
  async fn post<B, T>(&self, path: &'static str, body: &B) -> Result<T>
  where
    B: Serialize + Sync,
    T: DeserializeOwned,
  {
    let resp = self
      .client
      .post(self.url(path))
      .bearer_auth(&self.config.api_key)
      .json(body)
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::Status { path, status, body });
    }
    Ok(resp.json().await?)
  }
}

impl ProfileStore for BrazeClient {
  type Error = Error;

  async fn export(&self, filter: ProfileFilter) -> Result<Vec<Profile>> {
    let path = if filter.external_ids.is_empty() {
      "/users/export/segment"
    } else {
      "/users/export/ids"
    };
    // The export endpoints may ignore paging, so the window is cut here. The
    // request asks for everything up to the window's end.
    let offset = filter.offset.unwrap_or(0);
    let limit = filter.limit.unwrap_or(usize::MAX);
    let request = ProfileFilter {
      offset: None,
      limit: filter.limit.map(|limit| limit.saturating_add(offset)),
      ..filter
    };
    let resp: ExportResponse = self.post(path, &request).await?;
    debug!(path, count = resp.users.len(), offset, "exported profiles");
    Ok(resp.users.into_iter().skip(offset).take(limit).collect())
  }

  async fn upsert(&self, records: Vec<Record>) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    let _: serde_json::Value = self
      .post("/users/track", &TrackRequest { attributes: &records })
      .await?;
    debug!(count = records.len(), "upserted profiles");
    Ok(())
  }

  async fn delete(&self, external_ids: Vec<String>) -> Result<usize> {
    if external_ids.is_empty() {
      return Ok(0);
    }
    let resp: DeleteResponse = self
      .post("/users/delete", &DeleteRequest { external_ids: &external_ids })
      .await?;
    debug!(requested = external_ids.len(), deleted = resp.deleted, "deleted profiles");
    Ok(resp.deleted)
  }
}
