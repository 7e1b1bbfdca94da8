//! Read access to the merge ledger.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use dedup_core::{
  operation::{MergeOperation, OperationPage, OperationQuery, OperationStatus, UserDiff},
  remote::ProfileStore,
  store::{ConfigStore, MergeLedger},
  time::{end_of_day, parse_timestamp},
};

use crate::{Engine, Error, Result};

pub const MAX_PAGE_SIZE: u32 = 100;

/// Query-string form of [`OperationQuery`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOperationsRequest {
  pub page:       Option<u32>,
  pub limit:      Option<u32>,
  pub status:     Option<String>,
  /// `start,end`; either side may be empty.
  pub date_range: Option<String>,
}

impl ListOperationsRequest {
  pub fn into_query(self) -> Result<OperationQuery> {
    let defaults = OperationQuery::default();

    let page = self.page.unwrap_or(defaults.page);
    if page == 0 {
      return Err(Error::Validation("page must be at least 1".into()));
    }
    let limit = self.limit.unwrap_or(defaults.limit);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
      return Err(Error::Validation(format!(
        "limit must be between 1 and {MAX_PAGE_SIZE}"
      )));
    }

    let status = self
      .status
      .filter(|s| !s.is_empty())
      .map(|s| s.parse::<OperationStatus>())
      .transpose()?;

    let (created_after, created_before) = match self.date_range.as_deref() {
      Some(range) if !range.trim().is_empty() => parse_date_range(range)?,
      _ => (None, None),
    };

    Ok(OperationQuery { page, limit, status, created_after, created_before })
  }
}

type Bound = Option<DateTime<Utc>>;

/// Parse `start,end`. Each side is an RFC 3339 timestamp or a `YYYY-MM-DD`
/// date; a date covers the whole day, so an end date is inclusive.
pub fn parse_date_range(range: &str) -> Result<(Bound, Bound)> {
  let (start, end) = range.split_once(',').unwrap_or((range, ""));
  let start = parse_bound(start, NaiveTime::MIN)?;
  let end = parse_bound(end, end_of_day())?;
  if let (Some(s), Some(e)) = (start, end)
    && s > e
  {
    return Err(Error::Validation(format!(
      "date_range starts after it ends: {range:?}"
    )));
  }
  Ok((start, end))
}

fn parse_bound(s: &str, time_of_day: NaiveTime) -> Result<Bound> {
  let s = s.trim();
  if s.is_empty() {
    return Ok(None);
  }
  parse_timestamp(s, time_of_day).map(Some).ok_or_else(|| {
    Error::Validation(format!(
      "invalid date {s:?}: expected RFC 3339 or YYYY-MM-DD"
    ))
  })
}

/// An operation with everything needed to judge an unmerge.
#[derive(Debug, Clone, Serialize)]
pub struct OperationDetail {
  pub operation:   MergeOperation,
  pub user_diffs:  Vec<UserDiff>,
  pub can_unmerge: bool,
}

impl<P, L> Engine<P, L>
where
  P: ProfileStore,
  L: MergeLedger + ConfigStore,
{
  pub async fn list_operations(
    &self,
    query: OperationQuery,
  ) -> Result<OperationPage> {
    if query.page == 0 || !(1..=MAX_PAGE_SIZE).contains(&query.limit) {
      return Err(Error::Validation(format!(
        "page must be at least 1 and limit between 1 and {MAX_PAGE_SIZE}"
      )));
    }
    self
      .stored("list_operations", self.ledger.list_operations(query))
      .await
  }

  pub async fn get_operation(&self, id: i64) -> Result<OperationDetail> {
    let operation = self
      .stored("get_operation", self.ledger.get_operation(id))
      .await?
      .ok_or(Error::OperationNotFound(id))?;
    let user_diffs = self.stored("get_diffs", self.ledger.get_diffs(id)).await?;
    Ok(OperationDetail {
      can_unmerge: operation.status.can_unmerge(),
      operation,
      user_diffs,
    })
  }
}
