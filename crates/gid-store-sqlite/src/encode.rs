//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, dates `YYYY-MM-DD`, audit payloads compact
//! JSON and audit ids hyphenated lowercase UUIDs. Origins and statuses use
//! their `as_str` forms.

use chrono::{DateTime, NaiveDate, Utc};
use gid_core::{
  audit::{AuditAction, AuditEntry},
  gid::{GlobalId, SequenceState},
  identity::{IdentityFields, IdentityRecord, SourceEntity},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── DateTime<Utc> / NaiveDate ───────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

// ─── GlobalId ────────────────────────────────────────────────────────────────

pub fn encode_gid(id: &GlobalId) -> String { id.as_str().to_owned() }

// ─── AuditAction ─────────────────────────────────────────────────────────────

pub fn decode_action(s: &str) -> Result<AuditAction> {
  match s {
    "create" => Ok(AuditAction::Create),
    "update" => Ok(AuditAction::Update),
    "delete" => Ok(AuditAction::Delete),
    other => Err(Error::CorruptRow {
      table:  "audit_log",
      detail: format!("unknown action {other:?}"),
    }),
  }
}

// ─── Identity fields ─────────────────────────────────────────────────────────

/// Column values for `name, personal_number, national_id, passport_id,
/// birth_date`, in that order.
pub struct EncodedFields {
  pub name:            String,
  pub personal_number: Option<String>,
  pub national_id:     Option<String>,
  pub passport_id:     Option<String>,
  pub birth_date:      Option<String>,
}

impl From<&IdentityFields> for EncodedFields {
  fn from(f: &IdentityFields) -> Self {
    Self {
      name:            f.name.clone(),
      personal_number: f.personal_number.clone(),
      national_id:     f.national_id.clone(),
      passport_id:     f.passport_id.clone(),
      birth_date:      f.birth_date.map(encode_date),
    }
  }
}

impl EncodedFields {
  fn decode(self) -> Result<IdentityFields> {
    Ok(IdentityFields {
      name:            self.name,
      personal_number: self.personal_number,
      national_id:     self.national_id,
      passport_id:     self.passport_id,
      birth_date:      self.birth_date.as_deref().map(decode_date).transpose()?,
    })
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from the `g_id_sequence` row.
pub struct RawSequence {
  pub digit:   i64,
  pub year:    i64,
  pub alpha1:  String,
  pub alpha2:  String,
  pub number:  i64,
  pub version: i64,
}

impl RawSequence {
  pub fn into_state(self) -> Result<SequenceState> {
    let corrupt = |detail: String| Error::CorruptRow { table: "g_id_sequence", detail };
    let small = |v: i64, what: &str| {
      u8::try_from(v).map_err(|_| corrupt(format!("{what} {v} out of range")))
    };
    let letter = |s: &str, what: &str| {
      let mut chars = s.chars();
      match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(corrupt(format!("{what} {s:?} is not a single letter"))),
      }
    };
    let state = SequenceState {
      digit:  small(self.digit, "digit")?,
      year:   small(self.year, "year")?,
      alpha1: letter(&self.alpha1, "alpha1")?,
      alpha2: letter(&self.alpha2, "alpha2")?,
      number: small(self.number, "number")?,
    };
    state.validate()?;
    Ok(state)
  }
}

/// Raw strings read directly from an `identities` row.
pub struct RawIdentity {
  pub g_id:       String,
  pub origin:     String,
  pub fields:     EncodedFields,
  pub status:     String,
  pub created_at: String,
  pub updated_at: String,
}

impl RawIdentity {
  pub const COLUMNS: &'static str = "g_id, origin, name, personal_number, national_id, \
                             passport_id, birth_date, status, created_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      g_id:       row.get(0)?,
      origin:     row.get(1)?,
      fields:     EncodedFields {
        name:            row.get(2)?,
        personal_number: row.get(3)?,
        national_id:     row.get(4)?,
        passport_id:     row.get(5)?,
        birth_date:      row.get(6)?,
      },
      status:     row.get(7)?,
      created_at: row.get(8)?,
      updated_at: row.get(9)?,
    })
  }

  pub fn into_record(self) -> Result<IdentityRecord> {
    Ok(IdentityRecord {
      id:         self.g_id.parse()?,
      origin:     self.origin.parse()?,
      fields:     self.fields.decode()?,
      status:     self.status.parse()?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `source_entities` row.
pub struct RawSourceEntity {
  pub source_id:  i64,
  pub fields:     EncodedFields,
  pub g_id:       Option<String>,
  pub deleted_at: Option<String>,
}

impl RawSourceEntity {
  pub const COLUMNS: &'static str = "source_id, name, personal_number, national_id, \
                             passport_id, birth_date, g_id, deleted_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      source_id:  row.get(0)?,
      fields:     EncodedFields {
        name:            row.get(1)?,
        personal_number: row.get(2)?,
        national_id:     row.get(3)?,
        passport_id:     row.get(4)?,
        birth_date:      row.get(5)?,
      },
      g_id:       row.get(6)?,
      deleted_at: row.get(7)?,
    })
  }

  pub fn into_entity(self) -> Result<SourceEntity> {
    Ok(SourceEntity {
      source_id:  self.source_id,
      fields:     self.fields.decode()?,
      g_id:       self.g_id,
      deleted_at: self.deleted_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from an `audit_log` row.
pub struct RawAuditEntry {
  pub entry_id:    String,
  pub table_name:  String,
  pub record_id:   String,
  pub action:      String,
  pub old_value:   Option<String>,
  pub new_value:   Option<String>,
  pub reason:      String,
  pub changed_by:  String,
  pub recorded_at: String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditEntry> {
    let json = |s: Option<String>| -> Result<Option<serde_json::Value>> {
      Ok(s.as_deref().map(serde_json::from_str).transpose()?)
    };
    Ok(AuditEntry {
      entry_id:    Uuid::parse_str(&self.entry_id)?,
      table:       self.table_name,
      record_id:   self.record_id,
      action:      decode_action(&self.action)?,
      old_value:   json(self.old_value)?,
      new_value:   json(self.new_value)?,
      reason:      self.reason,
      changed_by:  self.changed_by,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}
