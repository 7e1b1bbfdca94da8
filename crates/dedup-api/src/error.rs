//! API error type and [`axum::response::IntoResponse`] implementation.

use std::fmt;

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use dedup_core::{Error, ErrorKind};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An engine error, tagged with the operation that failed.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct ApiError {
  pub operation: &'static str,
  #[source]
  pub source:    Error,
}

impl ApiError {
  pub fn new(operation: &'static str, source: Error) -> Self {
    Self { operation, source }
  }

  pub fn status(&self) -> StatusCode {
    match self.source.kind() {
      ErrorKind::Validation => StatusCode::BAD_REQUEST,
      ErrorKind::NotFound => StatusCode::NOT_FOUND,
      ErrorKind::Conflict => StatusCode::CONFLICT,
      ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
      ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

/// Shorthand for `map_err` in handlers.
pub fn failed(operation: &'static str) -> impl FnOnce(Error) -> ApiError {
  move |source| ApiError::new(operation, source)
}

/// Shorthand for turning an extractor rejection into a validation failure.
pub fn rejected<R: fmt::Display>(
  operation: &'static str,
) -> impl FnOnce(R) -> ApiError {
  move |rejection| {
    ApiError::new(operation, Error::Validation(rejection.to_string()))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(operation = self.operation, error = %self.source, "request failed");
    }
    let body = json!({
      "error":   format!("{} failed", self.operation),
      "kind":    self.source.kind(),
      "details": self.source.to_string(),
    });
    (status, Json(body)).into_response()
  }
}
