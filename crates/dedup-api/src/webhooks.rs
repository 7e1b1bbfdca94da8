//! Handlers for `/webhooks` and `/health`.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
};
use dedup_core::{
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
};
use dedup_engine::{
  Engine, HealthReport,
  webhook::{UpdateAck, WebhookOutcome, WebhookPayload},
};

use crate::error::{ApiError, failed, rejected};

/// `POST /webhooks/profile-created`
pub async fn profile_created<P, L>(
  State(engine): State<Engine<P, L>>,
  body: Result<Json<WebhookPayload>, JsonRejection>,
) -> Result<Json<WebhookOutcome>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Json(body) = body.map_err(rejected("Webhook processing"))?;
  Ok(Json(
    engine
      .profile_created(body)
      .await
      .map_err(failed("Webhook processing"))?,
  ))
}

/// `POST /webhooks/profile-updated`
pub async fn profile_updated<P, L>(
  State(engine): State<Engine<P, L>>,
  body: Result<Json<WebhookPayload>, JsonRejection>,
) -> Result<Json<UpdateAck>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Json(body) = body.map_err(rejected("Webhook processing"))?;
  Ok(Json(engine.profile_updated(body)))
}

/// `GET /health`
pub async fn health<P, L>(
  State(engine): State<Engine<P, L>>,
) -> Result<Json<HealthReport>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  Ok(Json(engine.health().await.map_err(failed("Health check"))?))
}
