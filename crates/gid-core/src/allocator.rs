//! The sequence allocator service.
//!
//! Wraps an [`IdentityStore`] with the operations exposed at the boundary:
//! single and batch allocation, preview, inspection and the
//! confirmation-gated reset.

use std::sync::Arc;

use serde::Serialize;

use crate::{
  Error,
  audit::{AuditAction, AuditEntry, AuditSink},
  gid::{GlobalId, SequenceState, current_two_digit_year},
  store::IdentityStore,
};

/// The persisted state plus the id the next allocation would return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceInfo {
  /// `None` until the first allocation creates the row.
  pub state: Option<SequenceState>,
  /// `None` once the sequence is exhausted.
  pub next:  Option<GlobalId>,
}

pub struct Allocator<S, A> {
  store: Arc<S>,
  audit: Arc<A>,
}

impl<S, A> Clone for Allocator<S, A> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), audit: Arc::clone(&self.audit) }
  }
}

impl<S, A> Allocator<S, A>
where
  S: IdentityStore,
  S::Error: From<Error>,
  A: AuditSink,
{
  pub fn new(store: Arc<S>, audit: Arc<A>) -> Self { Self { store, audit } }

  pub async fn allocate_one(&self) -> Result<GlobalId, S::Error> {
    let mut ids = self.allocate_batch(1).await?;
    ids.pop().ok_or_else(|| Error::SequenceExhausted.into())
  }

  /// Issue `count` consecutive ids with a single persisted update.
  pub async fn allocate_batch(&self, count: usize) -> Result<Vec<GlobalId>, S::Error> {
    if count == 0 {
      return Ok(Vec::new());
    }
    let ids = self.store.allocate(count, current_two_digit_year()).await?;
    tracing::debug!(
      count,
      first = %ids.first().map(GlobalId::as_str).unwrap_or_default(),
      "allocated G_IDs"
    );
    Ok(ids)
  }

  /// The id the next allocation would return. Never advances the state.
  pub async fn preview(&self) -> Result<GlobalId, S::Error> {
    self.info().await?.next.ok_or_else(|| Error::SequenceExhausted.into())
  }

  pub async fn info(&self) -> Result<SequenceInfo, S::Error> {
    let state = self.store.sequence_state().await?;
    let effective = state.unwrap_or_else(SequenceState::initial);
    // The terminal value can never be issued; see `SequenceState::take`.
    let next = effective
      .successor(current_two_digit_year())
      .ok()
      .map(|_| effective.to_id());
    Ok(SequenceInfo { state, next })
  }

  /// Rewind the counter to `{digit, year, 'A', 'A', 0}`.
  ///
  /// Fails closed unless `confirmed` is set. `year` defaults to the current
  /// calendar year. The reset is audited.
  pub async fn reset(
    &self,
    year: Option<u8>,
    digit: u8,
    confirmed: bool,
  ) -> Result<SequenceState, S::Error> {
    if !confirmed {
      return Err(Error::ResetNotConfirmed.into());
    }
    let state =
      SequenceState::starting_at(year.unwrap_or_else(current_two_digit_year), digit)?;
    let previous = self.store.reset_sequence(state).await?;
    tracing::warn!(%state, previous = ?previous.map(|p| p.to_string()), "G_ID sequence reset");

    let mut entry = AuditEntry::new(
      "g_id_sequence",
      "1",
      AuditAction::Update,
      "administrative sequence reset",
    )
    .by("operator");
    if let Some(previous) = previous {
      entry = entry.with_old(serde_json::to_value(previous).map_err(Error::from)?);
    }
    entry = entry.with_new(serde_json::to_value(state).map_err(Error::from)?);
    if let Err(e) = self.audit.append(vec![entry]).await {
      tracing::warn!(error = %e, "failed to record sequence reset in audit log");
    }
    Ok(state)
  }
}
