//! The `IdentityStore` trait.
//!
//! Implemented by storage backends (e.g. `gid-store-sqlite`). The
//! [`Allocator`](crate::allocator::Allocator) and
//! [`Reconciler`](crate::reconcile::Reconciler) depend on this abstraction,
//! not on any concrete backend.

use std::future::Future;

use crate::{
  gid::{GlobalId, SequenceState},
  identity::{IdentityRecord, Origin, SourceEntity},
  plan::IdentityChange,
};

/// The result of applying one [`IdentityChange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
  Applied,
  /// The change violated a storage constraint and was rolled back on its
  /// own. The rest of the pass is unaffected.
  Rejected(String),
}

/// Abstraction over a G_ID store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait IdentityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Sequence ──────────────────────────────────────────────────────────

  /// The persisted sequence state, or `None` before the first allocation.
  fn sequence_state(
    &self,
  ) -> impl Future<Output = Result<Option<SequenceState>, Self::Error>> + Send + '_;

  /// Atomically issue `count` consecutive ids and persist the advanced
  /// state exactly once.
  ///
  /// `current_year` seeds a missing state and is used when the year
  /// position wraps. Nothing is persisted if the run would exhaust the
  /// sequence.
  fn allocate(
    &self,
    count: usize,
    current_year: u8,
  ) -> impl Future<Output = Result<Vec<GlobalId>, Self::Error>> + Send + '_;

  /// Overwrite the sequence state. Returns the state it replaced.
  fn reset_sequence(
    &self,
    state: SequenceState,
  ) -> impl Future<Output = Result<Option<SequenceState>, Self::Error>> + Send + '_;

  // ── Identities ────────────────────────────────────────────────────────

  /// All identity rows, optionally restricted to one origin, ordered by
  /// `(id, origin)`.
  fn list_identities(
    &self,
    origin: Option<Origin>,
  ) -> impl Future<Output = Result<Vec<IdentityRecord>, Self::Error>> + Send + '_;

  /// Every row sharing `id` (at most one per origin).
  fn get_identity(
    &self,
    id: GlobalId,
  ) -> impl Future<Output = Result<Vec<IdentityRecord>, Self::Error>> + Send + '_;

  /// All rows of the authoritative source table, soft-deleted ones included.
  fn list_source_entities(
    &self,
  ) -> impl Future<Output = Result<Vec<SourceEntity>, Self::Error>> + Send + '_;

  /// Apply a reconciliation pass.
  ///
  /// Each change is applied atomically. A change that violates a storage
  /// constraint is reported as [`ChangeOutcome::Rejected`]; any other
  /// failure aborts and rolls back the whole pass. Outcomes are returned in
  /// the order of `changes`.
  fn apply_changes(
    &self,
    changes: Vec<IdentityChange>,
  ) -> impl Future<Output = Result<Vec<ChangeOutcome>, Self::Error>> + Send + '_;
}
