//! Identity records, incoming candidates, and authoritative-source rows.
//!
//! Canonical and mirror identities are one logical entity: an
//! [`IdentityRecord`] keyed by `(id, origin)`. The two rows that share an id
//! are kept consistent by the reconciler.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, gid::GlobalId};

// ─── Tags ────────────────────────────────────────────────────────────────────

/// Where an identity row's data came from.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
  /// The authoritative employment table. Always a complete snapshot.
  Source,
  /// A bulk file upload. Periodic and possibly incomplete.
  Upload,
}

impl Origin {
  pub const ALL: [Origin; 2] = [Origin::Source, Origin::Upload];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Source => "source",
      Self::Upload => "upload",
    }
  }

  /// The table name reported in audit entries for rows of this origin.
  pub fn table(self) -> &'static str {
    match self {
      Self::Source => "global_id",
      Self::Upload => "global_id_non_database",
    }
  }
}

impl std::str::FromStr for Origin {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "source" => Ok(Self::Source),
      "upload" => Ok(Self::Upload),
      other => Err(Error::UnknownOrigin(other.to_owned())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
  Active,
  #[serde(rename = "Non Active")]
  NonActive,
}

impl Status {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Active => "Active",
      Self::NonActive => "Non Active",
    }
  }

  pub fn is_active(self) -> bool { matches!(self, Self::Active) }
}

impl std::str::FromStr for Status {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "Active" => Ok(Self::Active),
      "Non Active" => Ok(Self::NonActive),
      other => Err(Error::UnknownStatus(other.to_owned())),
    }
  }
}

// ─── Fields ──────────────────────────────────────────────────────────────────

/// The person-describing fields shared by candidates, source rows and
/// identity records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
  pub name:            String,
  #[serde(default)]
  pub personal_number: Option<String>,
  #[serde(default)]
  pub national_id:     Option<String>,
  #[serde(default)]
  pub passport_id:     Option<String>,
  #[serde(default)]
  pub birth_date:      Option<NaiveDate>,
}

impl IdentityFields {
  /// Canonical form used for matching and storage: trimmed, empty strings
  /// dropped, national id stripped of `.`/`-`/whitespace, passport
  /// upper-cased.
  pub fn normalized(&self) -> Self {
    Self {
      name:            self.name.trim().to_owned(),
      personal_number: clean(self.personal_number.as_deref()),
      national_id:     clean(self.national_id.as_deref()).and_then(|s| {
        let stripped: String = s
          .chars()
          .filter(|c| !matches!(c, '.' | '-') && !c.is_whitespace())
          .collect();
        (!stripped.is_empty()).then_some(stripped)
      }),
      passport_id:     clean(self.passport_id.as_deref())
        .map(|s| s.to_uppercase()),
      birth_date:      self.birth_date,
    }
  }

  /// True if the fields a reconciliation pass may rewrite differ.
  pub fn mutable_fields_differ(&self, other: &Self) -> bool {
    self.name != other.name
      || self.personal_number != other.personal_number
      || self.birth_date != other.birth_date
  }

  /// Copy the mutable fields from `incoming`; anchors stay untouched.
  pub fn with_mutable_from(&self, incoming: &Self) -> Self {
    Self {
      name:            incoming.name.clone(),
      personal_number: incoming.personal_number.clone(),
      birth_date:      incoming.birth_date,
      national_id:     self.national_id.clone(),
      passport_id:     self.passport_id.clone(),
    }
  }

  /// Short human label used in logs and per-record errors.
  pub fn label(&self) -> String {
    match (&self.national_id, &self.passport_id) {
      (Some(nid), _) => format!("{} (national id {nid})", self.name),
      (None, Some(pp)) => format!("{} (passport {pp})", self.name),
      (None, None) => self.name.clone(),
    }
  }
}

fn clean(s: Option<&str>) -> Option<String> {
  s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// One row of the identity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
  pub id:         GlobalId,
  pub origin:     Origin,
  #[serde(flatten)]
  pub fields:     IdentityFields,
  pub status:     Status,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A validated, column-mapped incoming record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
  #[serde(flatten)]
  pub fields:               IdentityFields,
  /// Accept a national id that is not 16 digits.
  #[serde(default)]
  pub national_id_override: bool,
}

impl Candidate {
  pub fn new(fields: IdentityFields) -> Self {
    Self { fields, national_id_override: false }
  }
}

/// A row of the authoritative source table. Written by the system of record;
/// the core only reads it and writes back `g_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntity {
  pub source_id:  i64,
  #[serde(flatten)]
  pub fields:     IdentityFields,
  /// Raw stored id; may be absent or (on bad data) malformed.
  pub g_id:       Option<String>,
  pub deleted_at: Option<DateTime<Utc>>,
}

impl SourceEntity {
  pub fn is_live(&self) -> bool { self.deleted_at.is_none() }

  /// The stored id, if present and well formed.
  pub fn linked_id(&self) -> Option<GlobalId> {
    self.g_id.as_deref().and_then(|s| s.parse().ok())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalization_strips_and_drops_empty() {
    let raw = IdentityFields {
      name:            "  Siti Rahma ".into(),
      personal_number: Some("   ".into()),
      national_id:     Some(" 3201.0101-0101 0001 ".into()),
      passport_id:     Some(" a1234567 ".into()),
      birth_date:      None,
    };
    let n = raw.normalized();
    assert_eq!(n.name, "Siti Rahma");
    assert_eq!(n.personal_number, None);
    assert_eq!(n.national_id.as_deref(), Some("3201010101010001"));
    assert_eq!(n.passport_id.as_deref(), Some("A1234567"));
  }

  #[test]
  fn mutable_copy_keeps_anchors() {
    let stored = IdentityFields {
      name:            "Old".into(),
      personal_number: None,
      national_id:     Some("1".into()),
      passport_id:     Some("P".into()),
      birth_date:      None,
    };
    let incoming = IdentityFields {
      name:            "New".into(),
      personal_number: Some("77".into()),
      national_id:     Some("2".into()),
      passport_id:     None,
      birth_date:      NaiveDate::from_ymd_opt(1990, 1, 2),
    };
    let merged = stored.with_mutable_from(&incoming);
    assert_eq!(merged.name, "New");
    assert_eq!(merged.personal_number.as_deref(), Some("77"));
    assert_eq!(merged.national_id.as_deref(), Some("1"));
    assert_eq!(merged.passport_id.as_deref(), Some("P"));
    assert!(stored.mutable_fields_differ(&incoming));
    assert!(!merged.mutable_fields_differ(&incoming));
  }

  #[test]
  fn status_round_trips_display_form() {
    assert_eq!("Non Active".parse::<Status>().unwrap(), Status::NonActive);
    assert_eq!(Status::Active.as_str(), "Active");
    assert!("inactive".parse::<Status>().is_err());
  }
}
