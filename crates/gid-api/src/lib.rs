//! JSON REST API for the G_ID service.
//!
//! Exposes an axum [`Router`] backed by any store that implements both
//! [`IdentityStore`] and [`AuditSink`]. Auth, TLS and transport concerns are
//! the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", gid_api::api_router(store.clone(), policy))
//! ```

pub mod error;
pub mod identities;
pub mod reconcile;
pub mod sequence;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use gid_core::{
  allocator::Allocator, audit::AuditSink, policy::ValidationPolicy,
  reconcile::Reconciler, store::IdentityStore,
};

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:      Arc<S>,
  pub allocator:  Arc<Allocator<S, S>>,
  pub reconciler: Arc<Reconciler<S, S>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:      Arc::clone(&self.store),
      allocator:  Arc::clone(&self.allocator),
      reconciler: Arc::clone(&self.reconciler),
    }
  }
}

impl<S> AppState<S>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  pub fn new(store: Arc<S>, policy: ValidationPolicy) -> Self {
    Self {
      allocator: Arc::new(Allocator::new(Arc::clone(&store), Arc::clone(&store))),
      reconciler: Arc::new(Reconciler::new(Arc::clone(&store), Arc::clone(&store), policy)),
      store,
    }
  }
}

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, policy: ValidationPolicy) -> Router<()>
where
  S: IdentityStore + AuditSink + 'static,
  <S as IdentityStore>::Error: From<gid_core::Error>,
{
  Router::new()
    // Sequence
    .route("/sequence", get(sequence::info::<S>))
    .route("/sequence/allocate", post(sequence::allocate::<S>))
    .route("/sequence/reset", post(sequence::reset::<S>))
    // Reconciliation
    .route("/reconcile/source", post(reconcile::source::<S>))
    .route("/reconcile/upload", post(reconcile::upload::<S>))
    .route("/reconcile/upload/preview", post(reconcile::upload_preview::<S>))
    // Identities
    .route("/identities", get(identities::list::<S>))
    .route("/identities/{id}", get(identities::get_one::<S>))
    .route("/integrity", get(identities::report::<S>))
    .with_state(AppState::new(store, policy))
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use gid_core::identity::{IdentityFields, SourceEntity};
  use gid_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  async fn app() -> (Router, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    (api_router(Arc::clone(&store), ValidationPolicy::default()), store)
  }

  async fn send(
    app:    &Router,
    method: &str,
    uri:    &str,
    body:   Option<Value>,
  ) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
      Some(v) => builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(v.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  fn records() -> Value {
    json!({ "records": [
      { "name": "Ayu", "national_id": "3201010101010001", "birth_date": "1990-01-01" },
      { "name": "Budi", "passport_id": "AB1234567" },
    ]})
  }

  // ── Sequence ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn sequence_info_on_empty_store() {
    let (app, _) = app().await;
    let (status, body) = send(&app, "GET", "/sequence", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["state"].is_null());
    assert!(body["next"].as_str().unwrap().starts_with("G0"));
  }

  #[tokio::test]
  async fn allocate_returns_consecutive_ids() {
    let (app, _) = app().await;
    let (status, body) =
      send(&app, "POST", "/sequence/allocate", Some(json!({ "count": 3 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let ids = body["ids"].as_array().unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids[0].as_str().unwrap().ends_with("AA00"));
    assert!(ids[2].as_str().unwrap().ends_with("AA02"));

    let (_, body) = send(&app, "POST", "/sequence/allocate", Some(json!({}))).await;
    assert!(body["ids"][0].as_str().unwrap().ends_with("AA03"));
  }

  #[tokio::test]
  async fn reset_without_confirmation_is_428() {
    let (app, _) = app().await;
    send(&app, "POST", "/sequence/allocate", Some(json!({ "count": 5 }))).await;

    let (status, body) =
      send(&app, "POST", "/sequence/reset", Some(json!({ "year": 30 }))).await;
    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    assert!(body["error"].as_str().unwrap().contains("confirmation"));

    let (status, body) = send(
      &app,
      "POST",
      "/sequence/reset",
      Some(json!({ "year": 30, "digit": 2, "confirmed": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["digit"], 2);

    let (_, body) = send(&app, "GET", "/sequence", None).await;
    assert_eq!(body["next"], "G230AA00");
  }

  #[tokio::test]
  async fn reset_with_bad_digit_is_400() {
    let (app, _) = app().await;
    let (status, _) = send(
      &app,
      "POST",
      "/sequence/reset",
      Some(json!({ "digit": 12, "confirmed": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  // ── Reconciliation ──────────────────────────────────────────────────────────

  #[tokio::test]
  async fn upload_then_lookup() {
    let (app, _) = app().await;
    let (status, summary) = send(&app, "POST", "/reconcile/upload", Some(records())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["created"], 2);
    assert_eq!(summary["origin"], "upload");

    let (_, rows) = send(&app, "GET", "/identities?origin=upload", None).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["status"], "Active");

    let id = rows[0]["id"].as_str().unwrap();
    let (status, one) = send(&app, "GET", &format!("/identities/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one.as_array().unwrap().len(), 1);

    let (_, rows) = send(&app, "GET", "/identities?origin=source", None).await;
    assert!(rows.as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn identity_lookup_errors() {
    let (app, _) = app().await;
    let (status, _) = send(&app, "GET", "/identities/G099ZZ00", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(&app, "GET", "/identities/not-an-id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not-an-id"));
  }

  #[tokio::test]
  async fn preview_reports_without_writing() {
    let (app, _) = app().await;
    let (status, summary) =
      send(&app, "POST", "/reconcile/upload/preview", Some(records())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["created"], 2);

    let (_, rows) = send(&app, "GET", "/identities", None).await;
    assert!(rows.as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn invalid_records_come_back_as_errors() {
    let (app, _) = app().await;
    let body = json!({ "records": [ { "name": "Ayu", "national_id": "12-34" } ] });
    let (status, summary) = send(&app, "POST", "/reconcile/upload", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["created"], 0);
    assert_eq!(summary["errors"].as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn source_sync_and_integrity() {
    let (app, store) = app().await;
    store
      .upsert_source_entity(SourceEntity {
        source_id:  1,
        fields:     IdentityFields {
          name: "Ayu".into(),
          national_id: Some("3201010101010001".into()),
          ..Default::default()
        },
        g_id:       None,
        deleted_at: None,
      })
      .await
      .unwrap();

    let (status, summary) = send(&app, "POST", "/reconcile/source", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["created"], 1);
    assert_eq!(summary["linked"], 1);

    let (status, report) = send(&app, "GET", "/integrity", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["records"], 1);
    assert!(report["drifted"].as_array().unwrap().is_empty());
    assert!(report["ahead_of_sequence"].as_array().unwrap().is_empty());
  }
}
