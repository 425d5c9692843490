//! Handlers for `/identities` and `/integrity`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities` | Optional `?origin=source\|upload` |
//! | `GET`  | `/identities/{id}` | Every row sharing the id; 404 if none, 400 if malformed |
//! | `GET`  | `/integrity` | Drift, shared national ids, ids ahead of the sequence |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use gid_core::{
  audit::AuditSink,
  gid::GlobalId,
  identity::{IdentityRecord, Origin},
  integrity::{self, IntegrityReport},
  store::IdentityStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub origin: Option<Origin>,
}

/// `GET /identities[?origin=<origin>]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<IdentityRecord>>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let records = state
    .store
    .list_identities(params.origin)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(records))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /identities/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(raw): Path<String>,
) -> Result<Json<Vec<IdentityRecord>>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let id: GlobalId = raw
    .parse()
    .map_err(|e: gid_core::Error| ApiError::BadRequest(e.to_string()))?;
  let rows = state
    .store
    .get_identity(id.clone())
    .await
    .map_err(ApiError::from_store)?;
  if rows.is_empty() {
    return Err(ApiError::NotFound(format!("identity {id} not found")));
  }
  Ok(Json(rows))
}

// ─── Integrity ────────────────────────────────────────────────────────────────

/// `GET /integrity`
pub async fn report<S>(
  State(state): State<AppState<S>>,
) -> Result<Json<IntegrityReport>, ApiError>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  let records = state
    .store
    .list_identities(None)
    .await
    .map_err(ApiError::from_store)?;
  let next = state.allocator.info().await.map_err(ApiError::from_store)?.next;
  Ok(Json(integrity::check(&records, next.as_ref())))
}
