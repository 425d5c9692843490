//! Handlers for `/reconcile` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/reconcile/source` | Reconcile the authoritative source table |
//! | `POST` | `/reconcile/upload` | Body: `{"records": [...]}`, the complete upload |
//! | `POST` | `/reconcile/upload/preview` | Same body; nothing is written |

use axum::{Json, extract::State};
use gid_core::{
  audit::AuditSink,
  identity::Candidate,
  plan::ReconciliationSummary,
  reconcile::Snapshot,
  store::IdentityStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct UploadBody {
  pub records: Vec<Candidate>,
}

/// `POST /reconcile/source`
pub async fn source<S>(
  State(state): State<AppState<S>>,
) -> Result<Json<ReconciliationSummary>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let summary = state
    .reconciler
    .reconcile(Snapshot::Source)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(summary))
}

/// `POST /reconcile/upload`
pub async fn upload<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<UploadBody>,
) -> Result<Json<ReconciliationSummary>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let summary = state
    .reconciler
    .reconcile(Snapshot::Upload(body.records))
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(summary))
}

/// `POST /reconcile/upload/preview`
pub async fn upload_preview<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<UploadBody>,
) -> Result<Json<ReconciliationSummary>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let summary = state
    .reconciler
    .preview(Snapshot::Upload(body.records))
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(summary))
}
