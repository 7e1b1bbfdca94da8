//! Error type for `dedup-remote`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] dedup_core::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("POST {path} returned {status}: {body}")]
  Status {
    path:   &'static str,
    status: reqwest::StatusCode,
    body:   String,
  },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("failed to read seed file: {0}")]
  Seed(#[from] std::io::Error),

  #[error("record has no string external_id")]
  MissingExternalId,

  #[error("writes are disabled on this store")]
  WritesDisabled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
