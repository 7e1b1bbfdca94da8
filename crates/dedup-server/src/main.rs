//! dedup server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! merge ledger, connects to the configured profile store and serves the
//! JSON API under `/api`. The `scan` and `unmerge` subcommands run a single
//! engine operation and print its result as JSON.

mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dedup_core::remote::ProfileStore;
use dedup_engine::{Engine, scan::ScanRequest, unmerge::UnmergeRequest};
use dedup_remote::{BrazeClient, BrazeConfig, MemoryProfileStore};
use dedup_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::{RemoteConfig, ServerConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "Profile deduplication service")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API (default).
  Serve,
  /// Scan one batch of profiles for duplicates.
  Scan {
    /// Profiles to export for the scan.
    #[arg(long, default_value_t = dedup_engine::scan::DEFAULT_SCAN_BATCH_SIZE)]
    batch_size: u32,
    /// Merge candidates above the confidence threshold instead of only
    /// reporting them.
    #[arg(long)]
    apply:      bool,
  },
  /// Revert a completed merge operation.
  Unmerge {
    id:          i64,
    /// Mark the operation reverted without writing profiles back.
    #[arg(long)]
    keep_remote: bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = ServerConfig::load(&cli.config)?;

  let store_path = server_cfg.store_path();
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let ledger = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let command = cli.command.unwrap_or(Command::Serve);
  match &server_cfg.remote {
    RemoteConfig::Braze { api_url, api_key } => {
      let client = BrazeClient::new(BrazeConfig {
        api_url: api_url.clone(),
        api_key: api_key.clone(),
        timeout: server_cfg.engine_options().remote_timeout,
      })
      .context("failed to build CRM client")?;
      run(command, client, ledger, &server_cfg).await
    }
    RemoteConfig::Memory { seed_path } => {
      let profiles = match seed_path {
        Some(path) => {
          let path = expand_tilde(path);
          MemoryProfileStore::from_seed_file(&path)
            .await
            .with_context(|| format!("failed to load profiles from {path:?}"))?
        }
        None => MemoryProfileStore::new(),
      };
      tracing::warn!("using the in-memory profile store");
      run(command, profiles, ledger, &server_cfg).await
    }
  }
}

async fn run<P>(
  command: Command,
  profiles: P,
  ledger: SqliteStore,
  server_cfg: &ServerConfig,
) -> anyhow::Result<()>
where
  P: ProfileStore + 'static,
{
  let engine = Engine::new(profiles, ledger, server_cfg.engine_options());

  match command {
    Command::Serve => {
      let app = axum::Router::new()
        .nest("/api", dedup_api::api_router(engine))
        .layer(TraceLayer::new_for_http());
      let address = server_cfg.address();

      tracing::info!("Listening on http://{address}");
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

      axum::serve(listener, app).await.context("server error")?;
      Ok(())
    }
    Command::Scan { batch_size, apply } => {
      let report = engine
        .scan(ScanRequest {
          dry_run: !apply,
          batch_size: Some(batch_size),
          ..Default::default()
        })
        .await
        .context("scan failed")?;
      print_json(&report)
    }
    Command::Unmerge { id, keep_remote } => {
      let outcome = engine
        .unmerge(UnmergeRequest {
          merge_operation_id:     id,
          restore_original_users: !keep_remote,
        })
        .await
        .with_context(|| format!("unmerge of operation {id} failed"))?;
      print_json(&outcome)
    }
  }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  let json =
    serde_json::to_string_pretty(value).context("failed to encode result")?;
  println!("{json}");
  Ok(())
}
