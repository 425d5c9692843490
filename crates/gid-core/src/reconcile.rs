//! The lifecycle reconciler service.
//!
//! One pass loads the snapshot and every identity row, computes a
//! [`Plan`](crate::plan::Plan), allocates one batch of ids for the new
//! identities, applies everything through the store and finally hands one
//! audit entry per applied transition to the [`AuditSink`].

use std::sync::Arc;

use chrono::Utc;

use crate::{
  audit::{AuditEntry, AuditSink},
  gid::{GlobalId, SequenceState, current_two_digit_year},
  identity::{Candidate, IdentityRecord, Origin},
  plan::{
    self, IdentityChange, Incoming, ReconciliationSummary, RecordError, SourceLink,
    Write,
  },
  policy::ValidationPolicy,
  store::{ChangeOutcome, IdentityStore},
};

/// The record set a pass reconciles against.
#[derive(Debug, Clone)]
pub enum Snapshot {
  /// The live rows of the authoritative source table, read from the store.
  Source,
  /// A complete uploaded file, already column-mapped.
  Upload(Vec<Candidate>),
}

impl Snapshot {
  pub fn origin(&self) -> Origin {
    match self {
      Self::Source => Origin::Source,
      Self::Upload(_) => Origin::Upload,
    }
  }
}

pub struct Reconciler<S, A> {
  store:  Arc<S>,
  audit:  Arc<A>,
  policy: ValidationPolicy,
}

impl<S, A> Reconciler<S, A>
where
  S: IdentityStore,
  A: AuditSink,
{
  pub fn new(store: Arc<S>, audit: Arc<A>, policy: ValidationPolicy) -> Self {
    Self { store, audit, policy }
  }

  pub fn policy(&self) -> &ValidationPolicy { &self.policy }

  /// The summary [`reconcile`](Self::reconcile) would produce, without
  /// allocating or writing anything.
  pub async fn preview(&self, snapshot: Snapshot) -> Result<ReconciliationSummary, S::Error> {
    let origin = snapshot.origin();
    let (incoming, existing, next) = self.load(snapshot).await?;
    let plan =
      plan::plan(origin, incoming, &existing, &self.policy, Utc::now(), Some(&next));
    Ok(plan.projected_summary())
  }

  /// Run one reconciliation pass.
  ///
  /// Per-record failures are reported in the summary, including changes
  /// whose rows were modified by a concurrent pass after this one loaded
  /// them. A store failure other than a constraint violation aborts the
  /// pass with nothing written.
  pub async fn reconcile(&self, snapshot: Snapshot) -> Result<ReconciliationSummary, S::Error> {
    let origin = snapshot.origin();
    let (incoming, existing, next) = self.load(snapshot).await?;
    let now = Utc::now();
    let plan = plan::plan(origin, incoming, &existing, &self.policy, now, Some(&next));
    tracing::debug!(
      origin = origin.as_str(),
      existing = existing.len(),
      changes = plan.changes.len(),
      new = plan.pending.len(),
      invalid = plan.errors.len(),
      "planned reconciliation pass"
    );

    let mut changes = plan.changes;
    if !plan.pending.is_empty() {
      let ids = self
        .store
        .allocate(plan.pending.len(), current_two_digit_year())
        .await?;
      changes.extend(
        plan
          .pending
          .into_iter()
          .zip(ids)
          .map(|(pending, id)| pending.into_change(id, origin, now)),
      );
    }

    let outcomes = self.store.apply_changes(changes.clone()).await?;

    let mut summary = ReconciliationSummary::new(origin);
    summary.errors = plan.errors;
    let mut entries: Vec<AuditEntry> = Vec::new();
    for (change, outcome) in changes.iter().zip(outcomes) {
      match outcome {
        ChangeOutcome::Applied => {
          for m in &change.mutations {
            summary.tally(m.transition);
            entries.push(m.audit_entry());
          }
        }
        ChangeOutcome::Rejected(reason) => {
          tracing::warn!(id = %change.id, %reason, "identity change rejected by store");
          summary.errors.push(RecordError { record: change_label(change), reason });
        }
      }
    }

    if !entries.is_empty()
      && let Err(e) = self.audit.append(entries).await
    {
      tracing::warn!(error = %e, "failed to write audit entries for reconciliation pass");
    }

    tracing::info!(
      origin = origin.as_str(),
      created = summary.created,
      reused = summary.reused,
      reactivated = summary.reactivated,
      updated = summary.updated,
      deactivated = summary.deactivated,
      removed = summary.removed,
      linked = summary.linked,
      errors = summary.errors.len(),
      "reconciliation pass complete"
    );
    Ok(summary)
  }

  /// The incoming records, every identity row, and the next id the
  /// sequence will issue.
  async fn load(
    &self,
    snapshot: Snapshot,
  ) -> Result<(Vec<Incoming>, Vec<IdentityRecord>, GlobalId), S::Error> {
    let incoming = match snapshot {
      Snapshot::Upload(candidates) => candidates.into_iter().map(Incoming::from).collect(),
      Snapshot::Source => self
        .store
        .list_source_entities()
        .await?
        .into_iter()
        .filter(|e| e.is_live())
        .map(|e| Incoming {
          candidate: Candidate::new(e.fields),
          source:    Some(SourceLink { source_id: e.source_id, stored_id: e.g_id }),
        })
        .collect(),
    };
    let existing = self.store.list_identities(None).await?;
    let next = self
      .store
      .sequence_state()
      .await?
      .unwrap_or_else(SequenceState::initial)
      .to_id();
    Ok((incoming, existing, next))
  }
}

/// `"<id> <person>"` for the first record a change writes.
fn change_label(change: &IdentityChange) -> String {
  let person = change.mutations.iter().find_map(|m| match &m.write {
    Write::Insert(r) | Write::Delete(r) => Some(r.fields.label()),
    Write::Update { after, .. } => Some(after.fields.label()),
    Write::LinkSource { .. } => None,
  });
  match person {
    Some(person) => format!("{} {person}", change.id),
    None => change.id.to_string(),
  }
}
