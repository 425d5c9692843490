//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// A destructive operation was requested without confirmation.
  #[error("precondition required: {0}")]
  PreconditionRequired(String),

  /// Transient; the caller may retry.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Classify a backend error by the core error somewhere in its source
  /// chain. Anything else is an internal store failure.
  pub fn from_store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    use gid_core::Error as Core;

    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(&e);
    while let Some(err) = cause {
      if let Some(core) = err.downcast_ref::<Core>() {
        let message = core.to_string();
        match core {
          Core::ResetNotConfirmed => return Self::PreconditionRequired(message),
          Core::AllocationConflict { .. } => return Self::Conflict(message),
          Core::SequenceExhausted => return Self::Unavailable(message),
          Core::InvalidGlobalId(_)
          | Core::InvalidSequenceState(_)
          | Core::UnknownOrigin(_)
          | Core::UnknownStatus(_) => return Self::BadRequest(message),
          Core::Serialization(_) => break,
        }
      }
      cause = err.source();
    }
    Self::Store(Box::new(e))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::PreconditionRequired(m) => (StatusCode::PRECONDITION_REQUIRED, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "store failure while handling request");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
