//! [`SqliteStore`]: the SQLite implementation of [`IdentityStore`] and
//! [`AuditSink`].

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use gid_core::{
  audit::{AuditEntry, AuditSink},
  gid::{GlobalId, SequenceState},
  identity::{IdentityRecord, Origin, SourceEntity},
  plan::{IdentityChange, Transition, Write},
  store::{ChangeOutcome, IdentityStore},
};

use crate::{
  Error, Result,
  encode::{
    EncodedFields, RawAuditEntry, RawIdentity, RawSequence, RawSourceEntity, encode_dt,
    encode_gid,
  },
  schema::SCHEMA,
};

/// How many times an allocation is retried after losing the version race.
pub const DEFAULT_ALLOCATION_RETRIES: u32 = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A G_ID store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:               tokio_rusqlite::Connection,
  allocation_retries: u32,
}

/// What one allocation attempt produced.
enum Attempt {
  Issued(Vec<GlobalId>),
  /// The row's version moved between read and write.
  Conflict,
  Failed(Error),
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, allocation_retries: DEFAULT_ALLOCATION_RETRIES };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store. Useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, allocation_retries: DEFAULT_ALLOCATION_RETRIES };
    store.init_schema().await?;
    Ok(store)
  }

  /// Override the allocation retry bound. At least one attempt is made.
  pub fn with_allocation_retries(mut self, retries: u32) -> Self {
    self.allocation_retries = retries.max(1);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// One read-advance-persist step under a write lock.
  async fn try_allocate(&self, count: usize, current_year: u8) -> Result<Attempt> {
    let attempt = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw = tx
          .query_row(
            "SELECT digit, year, alpha1, alpha2, number, version
             FROM g_id_sequence WHERE id = 1",
            [],
            |row| {
              Ok(RawSequence {
                digit:   row.get(0)?,
                year:    row.get(1)?,
                alpha1:  row.get(2)?,
                alpha2:  row.get(3)?,
                number:  row.get(4)?,
                version: row.get(5)?,
              })
            },
          )
          .optional()?;

        let (state, version) = match raw {
          Some(raw) => {
            let version = raw.version;
            match raw.into_state() {
              Ok(state) => (state, Some(version)),
              Err(e) => return Ok(Attempt::Failed(e)),
            }
          }
          None => match SequenceState::starting_at(current_year, 0) {
            Ok(state) => (state, None),
            Err(e) => return Ok(Attempt::Failed(e.into())),
          },
        };

        let (ids, next) = match state.take(count, current_year) {
          Ok(taken) => taken,
          Err(e) => return Ok(Attempt::Failed(e.into())),
        };

        let now = encode_dt(Utc::now());
        let alpha1 = next.alpha1.to_string();
        let alpha2 = next.alpha2.to_string();
        let written = match version {
          Some(version) => tx.execute(
            "UPDATE g_id_sequence
             SET digit = ?1, year = ?2, alpha1 = ?3, alpha2 = ?4, number = ?5,
                 version = version + 1, updated_at = ?6
             WHERE id = 1 AND version = ?7",
            rusqlite::params![
              next.digit, next.year, alpha1, alpha2, next.number, now, version
            ],
          )?,
          None => tx.execute(
            "INSERT INTO g_id_sequence
               (id, digit, year, alpha1, alpha2, number, version, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT (id) DO NOTHING",
            rusqlite::params![next.digit, next.year, alpha1, alpha2, next.number, now],
          )?,
        };
        if written == 0 {
          return Ok(Attempt::Conflict);
        }

        tx.commit()?;
        Ok(Attempt::Issued(ids))
      })
      .await?;
    Ok(attempt)
  }

  // ── Source-table access ───────────────────────────────────────────────
  //
  // The source table belongs to the system of record. These let tests and
  // operators seed it.

  /// Insert or replace a source entity.
  pub async fn upsert_source_entity(&self, entity: SourceEntity) -> Result<()> {
    let fields = EncodedFields::from(&entity.fields);
    let deleted_at = entity.deleted_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO source_entities (
             source_id, name, personal_number, national_id, passport_id,
             birth_date, g_id, deleted_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT (source_id) DO UPDATE SET
             name = excluded.name,
             personal_number = excluded.personal_number,
             national_id = excluded.national_id,
             passport_id = excluded.passport_id,
             birth_date = excluded.birth_date,
             g_id = excluded.g_id,
             deleted_at = excluded.deleted_at",
          rusqlite::params![
            entity.source_id,
            fields.name,
            fields.personal_number,
            fields.national_id,
            fields.passport_id,
            fields.birth_date,
            entity.g_id,
            deleted_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Mark a source entity deleted. Returns `false` if it does not exist.
  pub async fn soft_delete_source_entity(
    &self,
    source_id: i64,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let at_str = encode_dt(at);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE source_entities SET deleted_at = ?2 WHERE source_id = ?1",
          rusqlite::params![source_id, at_str],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  /// Remove a source entity outright. Returns `false` if it does not exist.
  pub async fn delete_source_entity(&self, source_id: i64) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM source_entities WHERE source_id = ?1",
          rusqlite::params![source_id],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Audit reads ───────────────────────────────────────────────────────

  /// Every audit entry in append order.
  pub async fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, table_name, record_id, action, old_value, new_value,
                  reason, changed_by, recorded_at
           FROM audit_log ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawAuditEntry {
              entry_id:    row.get(0)?,
              table_name:  row.get(1)?,
              record_id:   row.get(2)?,
              action:      row.get(3)?,
              old_value:   row.get(4)?,
              new_value:   row.get(5)?,
              reason:      row.get(6)?,
              changed_by:  row.get(7)?,
              recorded_at: row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }
}

// ─── Pass application ────────────────────────────────────────────────────────

/// The message of a constraint violation, or `None` for any other error.
fn constraint_violation(e: &rusqlite::Error) -> Option<String> {
  match e {
    rusqlite::Error::SqliteFailure(f, msg)
      if f.code == rusqlite::ErrorCode::ConstraintViolation =>
    {
      Some(msg.clone().unwrap_or_else(|| f.to_string()))
    }
    _ => None,
  }
}

/// Execute every write of one change. `Ok(Some(reason))` means the change
/// must be abandoned without touching the rest of the pass.
///
/// Updates and deletes only hit a row whose status and `updated_at` still
/// match the state the pass was planned against. A fresh id is only inserted
/// if no row of any origin carries it yet.
fn apply_change(
  conn: &rusqlite::Connection,
  change: &IdentityChange,
) -> rusqlite::Result<Option<String>> {
  for mutation in &change.mutations {
    match &mutation.write {
      Write::Insert(record) => {
        if mutation.transition == Transition::Created {
          let taken: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM identities WHERE g_id = ?1)",
            rusqlite::params![encode_gid(&record.id)],
            |row| row.get(0),
          )?;
          if taken {
            return Ok(Some(format!("G_ID {} is already in use", record.id)));
          }
        }
        let f = EncodedFields::from(&record.fields);
        conn.execute(
          "INSERT INTO identities (
             g_id, origin, name, personal_number, national_id, passport_id,
             birth_date, status, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            encode_gid(&record.id),
            record.origin.as_str(),
            f.name,
            f.personal_number,
            f.national_id,
            f.passport_id,
            f.birth_date,
            record.status.as_str(),
            encode_dt(record.created_at),
            encode_dt(record.updated_at),
          ],
        )?;
      }
      Write::Update { before, after } => {
        let f = EncodedFields::from(&after.fields);
        let changed = conn.execute(
          "UPDATE identities
           SET name = ?3, personal_number = ?4, birth_date = ?5, status = ?6,
               updated_at = ?7
           WHERE g_id = ?1 AND origin = ?2 AND status = ?8 AND updated_at = ?9",
          rusqlite::params![
            encode_gid(&after.id),
            after.origin.as_str(),
            f.name,
            f.personal_number,
            f.birth_date,
            after.status.as_str(),
            encode_dt(after.updated_at),
            before.status.as_str(),
            encode_dt(before.updated_at),
          ],
        )?;
        if changed == 0 {
          return Ok(Some(stale(before)));
        }
      }
      Write::Delete(record) => {
        let changed = conn.execute(
          "DELETE FROM identities
           WHERE g_id = ?1 AND origin = ?2 AND status = ?3 AND updated_at = ?4",
          rusqlite::params![
            encode_gid(&record.id),
            record.origin.as_str(),
            record.status.as_str(),
            encode_dt(record.updated_at),
          ],
        )?;
        if changed == 0 {
          return Ok(Some(stale(record)));
        }
      }
      Write::LinkSource { source_id, id, .. } => {
        conn.execute(
          "UPDATE source_entities SET g_id = ?2 WHERE source_id = ?1",
          rusqlite::params![source_id, encode_gid(id)],
        )?;
      }
    }
  }
  Ok(None)
}

fn stale(record: &IdentityRecord) -> String {
  format!(
    "{} row for {} changed or vanished since the pass was planned",
    record.origin.as_str(),
    record.id
  )
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  type Error = Error;

  // ── Sequence ──────────────────────────────────────────────────────────────

  async fn sequence_state(&self) -> Result<Option<SequenceState>> {
    let raw: Option<RawSequence> = self
      .conn
      .call(|conn| {
        Ok(conn
          .query_row(
            "SELECT digit, year, alpha1, alpha2, number, version
             FROM g_id_sequence WHERE id = 1",
            [],
            |row| {
              Ok(RawSequence {
                digit:   row.get(0)?,
                year:    row.get(1)?,
                alpha1:  row.get(2)?,
                alpha2:  row.get(3)?,
                number:  row.get(4)?,
                version: row.get(5)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSequence::into_state).transpose()
  }

  async fn allocate(&self, count: usize, current_year: u8) -> Result<Vec<GlobalId>> {
    if count == 0 {
      return Ok(Vec::new());
    }
    for attempt in 1..=self.allocation_retries {
      match self.try_allocate(count, current_year).await? {
        Attempt::Issued(ids) => return Ok(ids),
        Attempt::Failed(e) => return Err(e),
        Attempt::Conflict => {
          tracing::debug!(attempt, "sequence version moved; retrying allocation");
        }
      }
    }
    Err(gid_core::Error::AllocationConflict { attempts: self.allocation_retries }.into())
  }

  async fn reset_sequence(&self, state: SequenceState) -> Result<Option<SequenceState>> {
    let now = encode_dt(Utc::now());
    let alpha1 = state.alpha1.to_string();
    let alpha2 = state.alpha2.to_string();

    let previous: Option<RawSequence> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous = tx
          .query_row(
            "SELECT digit, year, alpha1, alpha2, number, version
             FROM g_id_sequence WHERE id = 1",
            [],
            |row| {
              Ok(RawSequence {
                digit:   row.get(0)?,
                year:    row.get(1)?,
                alpha1:  row.get(2)?,
                alpha2:  row.get(3)?,
                number:  row.get(4)?,
                version: row.get(5)?,
              })
            },
          )
          .optional()?;
        tx.execute(
          "INSERT INTO g_id_sequence
             (id, digit, year, alpha1, alpha2, number, version, updated_at)
           VALUES (1, ?1, ?2, ?3, ?4, ?5, 1, ?6)
           ON CONFLICT (id) DO UPDATE SET
             digit = excluded.digit, year = excluded.year,
             alpha1 = excluded.alpha1, alpha2 = excluded.alpha2,
             number = excluded.number, version = g_id_sequence.version + 1,
             updated_at = excluded.updated_at",
          rusqlite::params![state.digit, state.year, alpha1, alpha2, state.number, now],
        )?;
        tx.commit()?;
        Ok(previous)
      })
      .await?;

    previous.map(RawSequence::into_state).transpose()
  }

  // ── Identities ────────────────────────────────────────────────────────────

  async fn list_identities(&self, origin: Option<Origin>) -> Result<Vec<IdentityRecord>> {
    let origin_str = origin.map(Origin::as_str);

    let raws: Vec<RawIdentity> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM identities
           WHERE ?1 IS NULL OR origin = ?1
           ORDER BY g_id, origin",
          RawIdentity::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![origin_str], RawIdentity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIdentity::into_record).collect()
  }

  async fn get_identity(&self, id: GlobalId) -> Result<Vec<IdentityRecord>> {
    let id_str = encode_gid(&id);

    let raws: Vec<RawIdentity> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM identities WHERE g_id = ?1 ORDER BY origin",
          RawIdentity::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawIdentity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIdentity::into_record).collect()
  }

  async fn list_source_entities(&self) -> Result<Vec<SourceEntity>> {
    let raws: Vec<RawSourceEntity> = self
      .conn
      .call(|conn| {
        let sql = format!(
          "SELECT {} FROM source_entities ORDER BY source_id",
          RawSourceEntity::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawSourceEntity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSourceEntity::into_entity).collect()
  }

  async fn apply_changes(&self, changes: Vec<IdentityChange>) -> Result<Vec<ChangeOutcome>> {
    let outcomes = self
      .conn
      .call(move |conn| {
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcomes = Vec::with_capacity(changes.len());

        for change in &changes {
          // A savepoint dropped without commit rolls back.
          let sp = tx.savepoint()?;
          match apply_change(&sp, change) {
            Ok(None) => {
              sp.commit()?;
              outcomes.push(ChangeOutcome::Applied);
            }
            Ok(Some(reason)) => outcomes.push(ChangeOutcome::Rejected(reason)),
            Err(e) => match constraint_violation(&e) {
              Some(reason) => outcomes.push(ChangeOutcome::Rejected(reason)),
              None => return Err(e.into()),
            },
          }
        }

        tx.commit()?;
        Ok(outcomes)
      })
      .await?;
    Ok(outcomes)
  }
}

// ─── AuditSink impl ──────────────────────────────────────────────────────────

impl AuditSink for SqliteStore {
  type Error = Error;

  async fn append(&self, entries: Vec<AuditEntry>) -> Result<()> {
    let rows = entries
      .into_iter()
      .map(|e| -> Result<_> {
        Ok((
          e.entry_id.hyphenated().to_string(),
          e.table,
          e.record_id,
          e.action.as_str(),
          e.old_value.map(|v| serde_json::to_string(&v)).transpose()?,
          e.new_value.map(|v| serde_json::to_string(&v)).transpose()?,
          e.reason,
          e.changed_by,
          encode_dt(e.recorded_at),
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO audit_log (
               entry_id, table_name, record_id, action, old_value, new_value,
               reason, changed_by, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          )?;
          for row in &rows {
            stmt.execute(rusqlite::params![
              row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
