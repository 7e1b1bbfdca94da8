//! Handlers for `/config`.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
};
use dedup_core::{
  config::{ConfigUpdate, DeduplicationConfig},
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
};
use dedup_engine::Engine;

use crate::error::{ApiError, failed, rejected};

/// `GET /config`
pub async fn get<P, L>(
  State(engine): State<Engine<P, L>>,
) -> Result<Json<DeduplicationConfig>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  Ok(Json(engine.config().await.map_err(failed("Get config"))?))
}

/// `PUT /config`: replaces the whole configuration.
pub async fn put<P, L>(
  State(engine): State<Engine<P, L>>,
  body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<DeduplicationConfig>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Json(body) = body.map_err(rejected("Update config"))?;
  Ok(Json(
    engine
      .update_config(body)
      .await
      .map_err(failed("Update config"))?,
  ))
}
