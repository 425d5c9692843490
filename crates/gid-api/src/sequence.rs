//! Handlers for `/sequence` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/sequence` | Persisted state plus the next id |
//! | `POST` | `/sequence/allocate` | Body: `{"count": n}` (default 1) |
//! | `POST` | `/sequence/reset` | Body: `{"year": yy, "digit": d, "confirmed": true}`; 428 unless confirmed |

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use gid_core::{
  allocator::SequenceInfo,
  audit::AuditSink,
  gid::{GlobalId, SequenceState},
  store::IdentityStore,
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

// ─── Info ─────────────────────────────────────────────────────────────────────

/// `GET /sequence`
pub async fn info<S>(State(state): State<AppState<S>>) -> Result<Json<SequenceInfo>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let info = state.allocator.info().await.map_err(ApiError::from_store)?;
  Ok(Json(info))
}

// ─── Allocate ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AllocateBody {
  #[serde(default = "one")]
  pub count: usize,
}

fn one() -> usize { 1 }

#[derive(Debug, Serialize)]
pub struct Allocated {
  pub ids: Vec<GlobalId>,
}

/// Upper bound on a single allocation request.
pub const MAX_BATCH: usize = 10_000;

/// `POST /sequence/allocate`
pub async fn allocate<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<AllocateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  if body.count > MAX_BATCH {
    return Err(ApiError::BadRequest(format!(
      "count {} exceeds the limit of {MAX_BATCH}",
      body.count
    )));
  }
  let ids = state
    .allocator
    .allocate_batch(body.count)
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(Allocated { ids })))
}

// ─── Reset ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResetBody {
  /// Two-digit year; defaults to the current year.
  pub year:      Option<u8>,
  #[serde(default)]
  pub digit:     u8,
  #[serde(default)]
  pub confirmed: bool,
}

/// `POST /sequence/reset`
pub async fn reset<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<ResetBody>,
) -> Result<Json<SequenceState>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let reset = state
    .allocator
    .reset(body.year, body.digit, body.confirmed)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(reset))
}
