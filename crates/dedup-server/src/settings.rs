//! Runtime configuration, read from `config.toml` and `DEDUP_*` variables.
//!
//! ```toml
//! host                = "127.0.0.1"
//! port                = 8080
//! store_path          = "~/.local/share/dedup/ledger.db"
//! remote_timeout_secs = 30
//! scan_batch_size     = 1000
//!
//! [remote]
//! kind    = "braze"
//! api_url = "https://rest.iad-01.braze.com"
//! api_key = "..."
//! ```
//!
//! Nested keys use `__` in the environment, e.g. `DEDUP_REMOTE__API_KEY`.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use dedup_engine::{DEFAULT_EXPORT_BATCH_SIZE, DEFAULT_REMOTE_TIMEOUT, EngineOptions};
use serde::Deserialize;

/// Where profiles live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteConfig {
  /// The CRM vendor's REST API.
  Braze { api_url: String, api_key: String },
  /// An in-process store, optionally seeded from a JSON array of profiles.
  Memory {
    #[serde(default)]
    seed_path: Option<PathBuf>,
  },
}

impl Default for RemoteConfig {
  fn default() -> Self { Self::Memory { seed_path: None } }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                String,
  #[serde(default = "default_port")]
  pub port:                u16,
  #[serde(default = "default_store_path")]
  pub store_path:          PathBuf,
  #[serde(default = "default_remote_timeout_secs")]
  pub remote_timeout_secs: u64,
  /// Profiles exported per webhook and potential-duplicate pass.
  #[serde(default = "default_scan_batch_size")]
  pub scan_batch_size:     usize,
  #[serde(default)]
  pub remote:              RemoteConfig,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("dedup.db") }

fn default_remote_timeout_secs() -> u64 { DEFAULT_REMOTE_TIMEOUT.as_secs() }

fn default_scan_batch_size() -> usize { DEFAULT_EXPORT_BATCH_SIZE }

impl ServerConfig {
  /// Layer the environment over the file at `path`. A missing file is not
  /// an error; every key has a default.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("DEDUP")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  /// The store path with a leading `~` expanded.
  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn engine_options(&self) -> EngineOptions {
    EngineOptions {
      remote_timeout:    Duration::from_secs(self.remote_timeout_secs),
      export_batch_size: self.scan_batch_size,
    }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
