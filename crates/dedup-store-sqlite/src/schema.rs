//! SQL schema for the ledger database.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS merge_operations (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    primary_user_id   TEXT    NOT NULL,
    merged_user_ids   TEXT    NOT NULL,   -- JSON array of external ids
    merge_strategy    TEXT    NOT NULL,   -- 'most_recent' | 'most_complete'
    status            TEXT    NOT NULL DEFAULT 'completed'
                      CHECK (status IN ('completed', 'failed', 'reverted')),
    preserve_channels INTEGER NOT NULL DEFAULT 1,
    idempotency_key   TEXT    UNIQUE,
    created_at        TEXT    NOT NULL    -- RFC 3339 UTC
);

-- Rows are written once, together with their operation, and never changed.
CREATE TABLE IF NOT EXISTS user_diffs (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    merge_operation_id INTEGER NOT NULL REFERENCES merge_operations(id),
    user_id            TEXT    NOT NULL,
    channel_name       TEXT    NOT NULL,
    original_data      TEXT    NOT NULL,  -- full pre-merge snapshot (JSON)
    merged_data        TEXT    NOT NULL,  -- canonical record (JSON)
    diff_data          TEXT    NOT NULL,  -- {key: {old, new}} (JSON)
    created_at         TEXT    NOT NULL
);

-- Single row, pinned to id 1.
CREATE TABLE IF NOT EXISTS deduplication_config (
    id                   INTEGER PRIMARY KEY CHECK (id = 1),
    matching_fields      TEXT    NOT NULL,  -- JSON array
    merge_strategy       TEXT    NOT NULL,
    auto_merge_enabled   INTEGER NOT NULL DEFAULT 1,
    confidence_threshold REAL    NOT NULL DEFAULT 0.8,
    webhook_url          TEXT,
    updated_at           TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS merge_operations_primary_user_idx ON merge_operations(primary_user_id);
CREATE INDEX IF NOT EXISTS merge_operations_status_idx       ON merge_operations(status);
CREATE INDEX IF NOT EXISTS merge_operations_created_at_idx   ON merge_operations(created_at);
CREATE INDEX IF NOT EXISTS user_diffs_merge_operation_idx    ON user_diffs(merge_operation_id);
CREATE INDEX IF NOT EXISTS user_diffs_user_id_idx            ON user_diffs(user_id);

-- Status only ever moves completed -> reverted.
CREATE TRIGGER IF NOT EXISTS merge_operations_status_final
BEFORE UPDATE OF status ON merge_operations
WHEN OLD.status != 'completed' OR NEW.status != 'reverted'
BEGIN
    SELECT RAISE(ABORT, 'merge operation status can only move from completed to reverted');
END;

CREATE TRIGGER IF NOT EXISTS merge_operations_no_delete
BEFORE DELETE ON merge_operations
BEGIN
    SELECT RAISE(ABORT, 'merge operations are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS user_diffs_no_update
BEFORE UPDATE ON user_diffs
BEGIN
    SELECT RAISE(ABORT, 'user diffs are immutable');
END;

CREATE TRIGGER IF NOT EXISTS user_diffs_no_delete
BEFORE DELETE ON user_diffs
BEGIN
    SELECT RAISE(ABORT, 'user diffs are never deleted');
END;

PRAGMA user_version = 1;
";
