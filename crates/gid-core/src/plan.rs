//! Reconciliation planning: snapshot + current records → mutations.
//!
//! Planning is pure. The whole plan, including which records are absent from
//! the snapshot, is derived from the pre-mutation view, so applying it in any
//! order gives the same result. Candidates that need a fresh id are returned
//! as [`PendingIdentity`] values; the caller allocates one batch of ids for
//! them and turns each into an [`IdentityChange`].

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  audit::{AuditAction, AuditEntry},
  gid::GlobalId,
  identity::{Candidate, IdentityFields, IdentityRecord, Origin, Status},
  matcher::MatchIndex,
  policy::{DuplicatePolicy, ValidationPolicy},
};

// ─── Input ───────────────────────────────────────────────────────────────────

/// The source-table row an incoming candidate was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
  pub source_id: i64,
  /// The id currently stored on the source row, verbatim.
  pub stored_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Incoming {
  pub candidate: Candidate,
  pub source:    Option<SourceLink>,
}

impl From<Candidate> for Incoming {
  fn from(candidate: Candidate) -> Self { Self { candidate, source: None } }
}

// ─── Mutations ───────────────────────────────────────────────────────────────

/// The lifecycle transition a mutation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
  /// A row for a freshly minted id.
  Created,
  /// A row for this origin attached to an id that already exists.
  Reused,
  Reactivated,
  /// Mutable fields rewritten; status unchanged.
  Refreshed,
  Deactivated,
  Removed,
  /// Assigned id written back to a source row.
  Linked,
}

/// A single storage write.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
  Insert(IdentityRecord),
  Update {
    before: IdentityRecord,
    after:  IdentityRecord,
  },
  Delete(IdentityRecord),
  LinkSource {
    source_id: i64,
    previous:  Option<String>,
    id:        GlobalId,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub transition: Transition,
  pub write:      Write,
  pub reason:     String,
}

impl Mutation {
  /// The audit entry describing this mutation.
  pub fn audit_entry(&self) -> AuditEntry {
    let to_json = |r: &IdentityRecord| serde_json::to_value(r).ok();
    match &self.write {
      Write::Insert(record) => {
        let entry = AuditEntry::new(
          record.origin.table(),
          record.id.as_str(),
          AuditAction::Create,
          &self.reason,
        );
        with_values(entry, None, to_json(record))
      }
      Write::Update { before, after } => {
        let entry = AuditEntry::new(
          after.origin.table(),
          after.id.as_str(),
          AuditAction::Update,
          &self.reason,
        );
        with_values(entry, to_json(before), to_json(after))
      }
      Write::Delete(record) => {
        let entry = AuditEntry::new(
          record.origin.table(),
          record.id.as_str(),
          AuditAction::Delete,
          &self.reason,
        );
        with_values(entry, to_json(record), None)
      }
      Write::LinkSource { source_id, previous, id } => {
        AuditEntry::new(
          "source_entities",
          source_id.to_string(),
          AuditAction::Update,
          &self.reason,
        )
        .with_old(serde_json::json!({ "g_id": previous }))
        .with_new(serde_json::json!({ "g_id": id }))
      }
    }
  }
}

fn with_values(
  entry: AuditEntry,
  old: Option<serde_json::Value>,
  new: Option<serde_json::Value>,
) -> AuditEntry {
  let entry = match old {
    Some(v) => entry.with_old(v),
    None => entry,
  };
  match new {
    Some(v) => entry.with_new(v),
    None => entry,
  }
}

/// Every mutation for one id. Applied atomically: all or none.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityChange {
  pub id:        GlobalId,
  pub mutations: Vec<Mutation>,
}

/// A candidate (plus any same-pass duplicates) that needs a fresh id.
#[derive(Debug, Clone)]
pub struct PendingIdentity {
  pub fields:  IdentityFields,
  pub sources: Vec<SourceLink>,
}

impl PendingIdentity {
  pub fn into_change(
    self,
    id: GlobalId,
    origin: Origin,
    now: DateTime<Utc>,
  ) -> IdentityChange {
    let record = IdentityRecord {
      id: id.clone(),
      origin,
      fields: self.fields,
      status: Status::Active,
      created_at: now,
      updated_at: now,
    };
    let mut mutations = vec![Mutation {
      transition: Transition::Created,
      write:      Write::Insert(record),
      reason:     format!("new identity from {} snapshot", origin.as_str()),
    }];
    mutations.extend(
      self
        .sources
        .into_iter()
        .filter(|link| link.stored_id.as_deref() != Some(id.as_str()))
        .map(|link| link_mutation(link, id.clone())),
    );
    IdentityChange { id, mutations }
  }
}

fn link_mutation(link: SourceLink, id: GlobalId) -> Mutation {
  Mutation {
    transition: Transition::Linked,
    write:      Write::LinkSource {
      source_id: link.source_id,
      previous: link.stored_id,
      id,
    },
    reason:     "G_ID written back to source entity".to_owned(),
  }
}

// ─── Summary ─────────────────────────────────────────────────────────────────

/// A candidate that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
  pub record: String,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
  pub origin:      Origin,
  pub created:     usize,
  pub reused:      usize,
  pub reactivated: usize,
  pub updated:     usize,
  pub deactivated: usize,
  pub removed:     usize,
  pub linked:      usize,
  pub errors:      Vec<RecordError>,
}

impl ReconciliationSummary {
  pub fn new(origin: Origin) -> Self {
    Self {
      origin,
      created: 0,
      reused: 0,
      reactivated: 0,
      updated: 0,
      deactivated: 0,
      removed: 0,
      linked: 0,
      errors: Vec::new(),
    }
  }

  pub fn tally(&mut self, transition: Transition) {
    let counter = match transition {
      Transition::Created => &mut self.created,
      Transition::Reused => &mut self.reused,
      Transition::Reactivated => &mut self.reactivated,
      Transition::Refreshed => &mut self.updated,
      Transition::Deactivated => &mut self.deactivated,
      Transition::Removed => &mut self.removed,
      Transition::Linked => &mut self.linked,
    };
    *counter += 1;
  }

  /// Total number of transitions applied.
  pub fn transitions(&self) -> usize {
    self.created
      + self.reused
      + self.reactivated
      + self.updated
      + self.deactivated
      + self.removed
      + self.linked
  }
}

// ─── Plan ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Plan {
  pub origin:  Origin,
  /// Changes to ids that already exist, ordered by id.
  pub changes: Vec<IdentityChange>,
  pub pending: Vec<PendingIdentity>,
  pub errors:  Vec<RecordError>,
}

impl Plan {
  /// The summary this plan would produce if every change applied cleanly.
  /// Each pending identity counts as one creation plus its links.
  pub fn projected_summary(&self) -> ReconciliationSummary {
    let mut summary = ReconciliationSummary::new(self.origin);
    for change in &self.changes {
      for m in &change.mutations {
        summary.tally(m.transition);
      }
    }
    for pending in &self.pending {
      summary.tally(Transition::Created);
      for _ in &pending.sources {
        summary.tally(Transition::Linked);
      }
    }
    summary.errors = self.errors.clone();
    summary
  }
}

enum Resolution {
  Existing(GlobalId),
  Pending(usize),
}

/// Compute the plan for one pass of `origin` over `incoming`.
///
/// `existing` is every identity row of every origin, read before the pass.
/// `unissued_from` is the next id the sequence will issue: an id stored on a
/// source entity at or after it, with no identity rows, was never minted and
/// is not trusted.
pub fn plan(
  origin: Origin,
  incoming: Vec<Incoming>,
  existing: &[IdentityRecord],
  policy: &ValidationPolicy,
  now: DateTime<Utc>,
  unissued_from: Option<&GlobalId>,
) -> Plan {
  let mut by_id: BTreeMap<&GlobalId, Vec<&IdentityRecord>> = BTreeMap::new();
  for record in existing {
    by_id.entry(&record.id).or_default().push(record);
  }
  let index = MatchIndex::build(existing.iter().map(|r| (&r.fields, r.id.clone())));

  let mut pending_index: MatchIndex<usize> = MatchIndex::new();
  let mut pending: Vec<PendingIdentity> = Vec::new();
  let mut changes: BTreeMap<GlobalId, Vec<Mutation>> = BTreeMap::new();
  let mut errors = Vec::new();
  // Ids resolved by a valid candidate in this pass.
  let mut claimed: HashSet<GlobalId> = HashSet::new();
  // Ids that must not be treated as absent, including ones only matched by
  // invalid candidates.
  let mut present: HashSet<GlobalId> = HashSet::new();

  for Incoming { candidate, source } in incoming {
    let candidate = Candidate {
      fields: candidate.fields.normalized(),
      ..candidate
    };
    let fields = &candidate.fields;

    let linked = source
      .as_ref()
      .and_then(|link| trusted_link(link, &by_id, unissued_from));
    let resolution = linked
      .or_else(|| index.find(fields).map(|m| m.key))
      .map(Resolution::Existing)
      .or_else(|| pending_index.find(fields).map(|m| Resolution::Pending(m.key)));

    if let Err(issues) = policy.validate(&candidate) {
      if let Some(Resolution::Existing(id)) = &resolution {
        present.insert(id.clone());
      }
      errors.push(RecordError { record: fields.label(), reason: issues.join("; ") });
      continue;
    }

    match resolution {
      Some(Resolution::Existing(id)) => {
        present.insert(id.clone());
        let mut mutations = if claimed.insert(id.clone()) {
          let rows = by_id.get(&id).map(Vec::as_slice).unwrap_or_default();
          plan_existing(origin, &id, rows, fields, now)
        } else if policy.duplicates == DuplicatePolicy::Reject {
          errors.push(RecordError {
            record: fields.label(),
            reason: format!("duplicate of another record resolved to {id} in this snapshot"),
          });
          continue;
        } else {
          Vec::new()
        };
        if let Some(link) = source
          && link.stored_id.as_deref() != Some(id.as_str())
        {
          mutations.push(link_mutation(link, id.clone()));
        }
        if !mutations.is_empty() {
          changes.entry(id).or_default().extend(mutations);
        }
      }
      Some(Resolution::Pending(slot)) => {
        if policy.duplicates == DuplicatePolicy::Reject {
          errors.push(RecordError {
            record: fields.label(),
            reason: "duplicate of another new record in this snapshot".to_owned(),
          });
          continue;
        }
        pending[slot].sources.extend(source);
      }
      None => {
        pending_index.insert(fields, pending.len());
        pending.push(PendingIdentity {
          fields:  fields.clone(),
          sources: source.into_iter().collect(),
        });
      }
    }
  }

  for record in existing.iter().filter(|r| r.origin == origin) {
    if present.contains(&record.id) {
      continue;
    }
    let mutation = match origin {
      Origin::Upload if record.status.is_active() => Mutation {
        transition: Transition::Deactivated,
        write:      Write::Update {
          before: record.clone(),
          after:  IdentityRecord {
            status: Status::NonActive,
            updated_at: now,
            ..record.clone()
          },
        },
        reason:     "deactivated: absent from upload snapshot".to_owned(),
      },
      Origin::Upload => continue,
      Origin::Source => Mutation {
        transition: Transition::Removed,
        write:      Write::Delete(record.clone()),
        reason:     "removed: source entity deleted".to_owned(),
      },
    };
    changes.entry(record.id.clone()).or_default().push(mutation);
  }

  Plan {
    origin,
    changes: changes
      .into_iter()
      .map(|(id, mutations)| IdentityChange { id, mutations })
      .collect(),
    pending,
    errors,
  }
}

/// The id stored on a source entity, if it can be linked to directly.
fn trusted_link(
  link: &SourceLink,
  by_id: &BTreeMap<&GlobalId, Vec<&IdentityRecord>>,
  unissued_from: Option<&GlobalId>,
) -> Option<GlobalId> {
  let stored = link.stored_id.as_deref()?;
  let Ok(id) = stored.parse::<GlobalId>() else {
    tracing::warn!(source_id = link.source_id, stored, "ignoring malformed G_ID on source entity");
    return None;
  };
  if !by_id.contains_key(&id) && unissued_from.is_some_and(|next| id >= *next) {
    tracing::warn!(
      source_id = link.source_id,
      stored,
      "ignoring G_ID on source entity that the sequence has not issued"
    );
    return None;
  }
  Some(id)
}

/// Mutations for a candidate resolved to an id that already exists.
///
/// The row for `origin` is reactivated, refreshed or (if missing) created.
/// The source row is authoritative for the mutable fields: an upload row
/// sharing its id mirrors it, and an upload pass never rewrites it. Status
/// is per origin, except that a reactivation or reuse reactivates the
/// paired row too.
fn plan_existing(
  origin: Origin,
  id: &GlobalId,
  rows: &[&IdentityRecord],
  incoming: &IdentityFields,
  now: DateTime<Utc>,
) -> Vec<Mutation> {
  let mut out = Vec::new();
  let own = rows.iter().find(|r| r.origin == origin);
  let authority = rows
    .iter()
    .find(|r| r.origin == Origin::Source && r.origin != origin);
  let wanted = authority.map_or(incoming, |r| &r.fields);

  let reactivating = match own {
    Some(row) => {
      let fields = row.fields.with_mutable_from(wanted);
      if !row.status.is_active() {
        out.push(Mutation {
          transition: Transition::Reactivated,
          write:      update(row, fields, Status::Active, now),
          reason:     format!("reactivated: present in {} snapshot", origin.as_str()),
        });
        true
      } else if row.fields.mutable_fields_differ(wanted) {
        let reason = match authority {
          Some(_) => "fields synchronised with source record sharing this G_ID".to_owned(),
          None => format!("fields refreshed from {} snapshot", origin.as_str()),
        };
        out.push(Mutation {
          transition: Transition::Refreshed,
          write:      update(row, fields, Status::Active, now),
          reason,
        });
        false
      } else {
        return out;
      }
    }
    None => {
      let fields = match authority {
        Some(source) => source.fields.clone(),
        None => incoming.clone(),
      };
      out.push(Mutation {
        transition: Transition::Reused,
        write:      Write::Insert(IdentityRecord {
          id: id.clone(),
          origin,
          fields,
          status: Status::Active,
          created_at: now,
          updated_at: now,
        }),
        reason:     format!("existing G_ID reused for {} snapshot", origin.as_str()),
      });
      true
    }
  };

  for paired in rows.iter().filter(|r| r.origin != origin) {
    let fields = match origin {
      Origin::Source => paired.fields.with_mutable_from(incoming),
      Origin::Upload => paired.fields.clone(),
    };
    if reactivating && !paired.status.is_active() {
      out.push(Mutation {
        transition: Transition::Reactivated,
        write:      update(paired, fields, Status::Active, now),
        reason:     format!(
          "reactivated alongside {} record sharing this G_ID",
          origin.as_str()
        ),
      });
    } else if paired.fields.mutable_fields_differ(&fields) {
      out.push(Mutation {
        transition: Transition::Refreshed,
        write:      update(paired, fields, paired.status, now),
        reason:     "fields synchronised with source record sharing this G_ID".to_owned(),
      });
    }
  }
  out
}

fn update(
  row: &IdentityRecord,
  fields: IdentityFields,
  status: Status,
  now: DateTime<Utc>,
) -> Write {
  Write::Update {
    before: row.clone(),
    after:  IdentityRecord {
      fields,
      status,
      updated_at: now,
      ..row.clone()
    },
  }
}
