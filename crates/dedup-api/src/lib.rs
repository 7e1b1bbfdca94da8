//! JSON REST API for the deduplication engine.
//!
//! Exposes an axum [`Router`] over any [`Engine`]. Auth, TLS, webhook
//! signature checks and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", dedup_api::api_router(engine.clone()))
//! ```

pub mod config;
pub mod deduplicate;
pub mod error;
pub mod operations;
pub mod webhooks;

use axum::{
  Router,
  routing::{get, post},
};
use dedup_core::{
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
};
use dedup_engine::Engine;

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<P, L>(engine: Engine<P, L>) -> Router<()>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  Router::new()
    // Deduplication
    .route("/deduplicate/scan", post(deduplicate::scan::<P, L>))
    .route("/deduplicate/merge", post(deduplicate::merge::<P, L>))
    .route("/deduplicate/unmerge", post(deduplicate::unmerge::<P, L>))
    // Ledger
    .route("/operations", get(operations::list::<P, L>))
    .route("/operations/{id}", get(operations::get_one::<P, L>))
    .route("/operations/{id}/reapply", post(deduplicate::reapply::<P, L>))
    .route("/duplicates/potential", get(operations::potential::<P, L>))
    // Configuration
    .route("/config", get(config::get::<P, L>).put(config::put::<P, L>))
    // Webhooks
    .route(
      "/webhooks/profile-created",
      post(webhooks::profile_created::<P, L>),
    )
    .route(
      "/webhooks/profile-updated",
      post(webhooks::profile_updated::<P, L>),
    )
    .route("/health", get(webhooks::health::<P, L>))
    .with_state(engine)
}
