//! Consistency checks over the identity table.
//!
//! Ids are fixed width with the most significant position first, so string
//! order is issue order and "at or after the next id" is a plain comparison.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{
  gid::GlobalId,
  identity::{IdentityRecord, Origin},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedNationalId {
  pub national_id: String,
  pub ids:         Vec<GlobalId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
  pub records:           usize,
  pub active:            usize,
  /// Ids held by both origins.
  pub paired:            usize,
  /// Ids whose rows disagree on the mutable fields. Status is tracked per
  /// origin and may differ.
  pub drifted:           Vec<GlobalId>,
  /// National ids carried by more than one distinct id.
  pub shared_national:   Vec<SharedNationalId>,
  /// Ids the sequence would issue again.
  pub ahead_of_sequence: Vec<GlobalId>,
}

impl IntegrityReport {
  pub fn is_clean(&self) -> bool {
    self.drifted.is_empty()
      && self.shared_national.is_empty()
      && self.ahead_of_sequence.is_empty()
  }
}

/// Build the report. `next` is the id the allocator would issue next.
pub fn check(records: &[IdentityRecord], next: Option<&GlobalId>) -> IntegrityReport {
  let mut by_id: BTreeMap<&GlobalId, Vec<&IdentityRecord>> = BTreeMap::new();
  let mut by_nid: BTreeMap<&str, BTreeSet<&GlobalId>> = BTreeMap::new();
  for r in records {
    by_id.entry(&r.id).or_default().push(r);
    if let Some(nid) = &r.fields.national_id {
      by_nid.entry(nid.as_str()).or_default().insert(&r.id);
    }
  }

  let mut report = IntegrityReport {
    records: records.len(),
    active: records.iter().filter(|r| r.status.is_active()).count(),
    ..Default::default()
  };

  for (id, rows) in &by_id {
    let origins: BTreeSet<Origin> = rows.iter().map(|r| r.origin).collect();
    if origins.len() > 1 {
      report.paired += 1;
    }
    let first = rows[0];
    if rows[1..].iter().any(|r| r.fields.mutable_fields_differ(&first.fields)) {
      report.drifted.push((*id).clone());
    }
    if let Some(next) = next
      && *id >= next
    {
      report.ahead_of_sequence.push((*id).clone());
    }
  }

  report.shared_national = by_nid
    .into_iter()
    .filter(|(_, ids)| ids.len() > 1)
    .map(|(nid, ids)| SharedNationalId {
      national_id: nid.to_owned(),
      ids:         ids.into_iter().cloned().collect(),
    })
    .collect();

  report
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::identity::{IdentityFields, Status};

  fn row(id: &str, origin: Origin, name: &str, nid: &str, status: Status) -> IdentityRecord {
    IdentityRecord {
      id: id.parse().unwrap(),
      origin,
      fields: IdentityFields {
        name: name.into(),
        national_id: Some(nid.into()),
        ..Default::default()
      },
      status,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn consistent_pair_is_clean() {
    let records = [
      row("G025AA00", Origin::Source, "Ayu", "1", Status::Active),
      row("G025AA00", Origin::Upload, "Ayu", "1", Status::Active),
    ];
    let next: GlobalId = "G025AA01".parse().unwrap();
    let report = check(&records, Some(&next));
    assert!(report.is_clean());
    assert_eq!(report.paired, 1);
    assert_eq!(report.active, 2);
  }

  #[test]
  fn per_origin_status_is_not_drift() {
    let records = [
      row("G025AA00", Origin::Source, "Ayu", "1", Status::Active),
      row("G025AA00", Origin::Upload, "Ayu", "1", Status::NonActive),
    ];
    let report = check(&records, None);
    assert!(report.drifted.is_empty());
    assert_eq!(report.active, 1);
  }

  #[test]
  fn finds_drift_shared_national_ids_and_ids_ahead() {
    let records = [
      row("G025AA00", Origin::Source, "Ayu", "1", Status::Active),
      row("G025AA00", Origin::Upload, "Ayu Lestari", "1", Status::Active),
      row("G025AA01", Origin::Upload, "Budi", "2", Status::Active),
      row("G025AA05", Origin::Upload, "Budi B", "2", Status::Active),
    ];
    let next: GlobalId = "G025AA02".parse().unwrap();
    let report = check(&records, Some(&next));

    assert_eq!(report.drifted, ["G025AA00".parse::<GlobalId>().unwrap()]);
    assert_eq!(report.shared_national.len(), 1);
    assert_eq!(report.shared_national[0].national_id, "2");
    assert_eq!(report.shared_national[0].ids.len(), 2);
    assert_eq!(report.ahead_of_sequence, ["G025AA05".parse::<GlobalId>().unwrap()]);
  }
}
