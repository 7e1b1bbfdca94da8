//! Handlers for `/deduplicate` and `/operations/{id}/reapply`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/deduplicate/scan` | Body: `{"dry_run":true,"batch_size":100,"filters":{}}` |
//! | `POST` | `/deduplicate/merge` | Body: `{"primary_user_id":"2","duplicate_user_ids":["1"]}` |
//! | `POST` | `/deduplicate/unmerge` | Body: `{"merge_operation_id":1}` |
//! | `POST` | `/operations/{id}/reapply` | 409 unless the operation is completed |

use axum::{
  Json,
  extract::{
    Path, State,
    rejection::{JsonRejection, PathRejection},
  },
};
use dedup_core::{
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
};
use dedup_engine::{
  Engine,
  merge::{MergeOutcome, MergeRequest},
  scan::{ScanReport, ScanRequest},
  unmerge::{UnmergeOutcome, UnmergeRequest},
};

use crate::error::{ApiError, failed, rejected};

/// `POST /deduplicate/scan`
pub async fn scan<P, L>(
  State(engine): State<Engine<P, L>>,
  body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanReport>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Json(body) = body.map_err(rejected("Scan"))?;
  Ok(Json(engine.scan(body).await.map_err(failed("Scan"))?))
}

/// `POST /deduplicate/merge`
pub async fn merge<P, L>(
  State(engine): State<Engine<P, L>>,
  body: Result<Json<MergeRequest>, JsonRejection>,
) -> Result<Json<MergeOutcome>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Json(body) = body.map_err(rejected("Merge"))?;
  Ok(Json(engine.merge(body).await.map_err(failed("Merge"))?))
}

/// `POST /deduplicate/unmerge`
pub async fn unmerge<P, L>(
  State(engine): State<Engine<P, L>>,
  body: Result<Json<UnmergeRequest>, JsonRejection>,
) -> Result<Json<UnmergeOutcome>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Json(body) = body.map_err(rejected("Unmerge"))?;
  Ok(Json(engine.unmerge(body).await.map_err(failed("Unmerge"))?))
}

/// `POST /operations/{id}/reapply`
pub async fn reapply<P, L>(
  State(engine): State<Engine<P, L>>,
  id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MergeOutcome>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Path(id) = id.map_err(rejected("Reapply"))?;
  Ok(Json(engine.reapply(id).await.map_err(failed("Reapply"))?))
}
