//! SQL schema for the G_ID SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision so later migrations can be gated on it.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Exactly one row. `version` is bumped on every write and compared on update.
CREATE TABLE IF NOT EXISTS g_id_sequence (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    digit       INTEGER NOT NULL CHECK (digit  BETWEEN 0 AND 9),
    year        INTEGER NOT NULL CHECK (year   BETWEEN 0 AND 99),
    alpha1      TEXT    NOT NULL CHECK (alpha1 BETWEEN 'A' AND 'Z' AND length(alpha1) = 1),
    alpha2      TEXT    NOT NULL CHECK (alpha2 BETWEEN 'A' AND 'Z' AND length(alpha2) = 1),
    number      INTEGER NOT NULL CHECK (number BETWEEN 0 AND 99),
    version     INTEGER NOT NULL,
    updated_at  TEXT    NOT NULL
);

-- Canonical (origin = 'source') and mirror (origin = 'upload') rows.
-- The two rows sharing a g_id describe one person.
CREATE TABLE IF NOT EXISTS identities (
    g_id            TEXT NOT NULL CHECK (length(g_id) = 8),
    origin          TEXT NOT NULL CHECK (origin IN ('source', 'upload')),
    name            TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 255),
    personal_number TEXT,
    national_id     TEXT,
    passport_id     TEXT,
    birth_date      TEXT,            -- YYYY-MM-DD
    status          TEXT NOT NULL CHECK (status IN ('Active', 'Non Active')),
    created_at      TEXT NOT NULL,   -- RFC 3339 UTC
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (g_id, origin)
);

CREATE UNIQUE INDEX IF NOT EXISTS identities_national_id_uq
    ON identities(origin, national_id) WHERE national_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS identities_passport_idx ON identities(passport_id);

-- Written by the system of record. Only g_id is ever updated from here.
CREATE TABLE IF NOT EXISTS source_entities (
    source_id       INTEGER PRIMARY KEY,
    name            TEXT NOT NULL,
    personal_number TEXT,
    national_id     TEXT,
    passport_id     TEXT,
    birth_date      TEXT,
    g_id            TEXT,
    deleted_at      TEXT
);

CREATE TABLE IF NOT EXISTS audit_log (
    entry_id    TEXT PRIMARY KEY,
    table_name  TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    action      TEXT NOT NULL CHECK (action IN ('create', 'update', 'delete')),
    old_value   TEXT,            -- JSON or NULL
    new_value   TEXT,            -- JSON or NULL
    reason      TEXT NOT NULL,
    changed_by  TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS audit_log_record_idx ON audit_log(table_name, record_id);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
    BEFORE UPDATE ON audit_log
    BEGIN SELECT RAISE(ABORT, 'audit_log is append-only'); END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
    BEFORE DELETE ON audit_log
    BEGIN SELECT RAISE(ABORT, 'audit_log is append-only'); END;

PRAGMA user_version = 1;
";
