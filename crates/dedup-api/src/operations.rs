//! Handlers for `/operations` and `/duplicates/potential`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/operations` | `?page=&limit=&status=&date_range=start,end` |
//! | `GET`  | `/operations/{id}` | 404 if not found |
//! | `GET`  | `/duplicates/potential` | `?confidence_threshold=&limit=&matching_field=` |

use axum::{
  Json,
  extract::{
    Path, Query, State,
    rejection::{PathRejection, QueryRejection},
  },
};
use dedup_core::{
  operation::OperationPage,
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
};
use dedup_engine::{
  Engine,
  operations::{ListOperationsRequest, OperationDetail},
  scan::{PotentialQuery, PotentialReport},
};

use crate::error::{ApiError, failed, rejected};

/// `GET /operations`
pub async fn list<P, L>(
  State(engine): State<Engine<P, L>>,
  params: Result<Query<ListOperationsRequest>, QueryRejection>,
) -> Result<Json<OperationPage>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Query(params) = params.map_err(rejected("List operations"))?;
  let query = params.into_query().map_err(failed("List operations"))?;
  let page = engine
    .list_operations(query)
    .await
    .map_err(failed("List operations"))?;
  Ok(Json(page))
}

/// `GET /operations/{id}`
pub async fn get_one<P, L>(
  State(engine): State<Engine<P, L>>,
  id: Result<Path<i64>, PathRejection>,
) -> Result<Json<OperationDetail>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Path(id) = id.map_err(rejected("Get operation"))?;
  Ok(Json(
    engine.get_operation(id).await.map_err(failed("Get operation"))?,
  ))
}

/// `GET /duplicates/potential`
pub async fn potential<P, L>(
  State(engine): State<Engine<P, L>>,
  params: Result<Query<PotentialQuery>, QueryRejection>,
) -> Result<Json<PotentialReport>, ApiError>
where
  P: ProfileStore + 'static,
  L: MergeLedger + ConfigStore + 'static,
{
  let Query(params) = params.map_err(rejected("Find potential duplicates"))?;
  Ok(Json(
    engine
      .potential_duplicates(params)
      .await
      .map_err(failed("Find potential duplicates"))?,
  ))
}
