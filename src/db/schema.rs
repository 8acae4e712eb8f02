//! SQL DDL for the derived index.
//!
//! Defines `chunks`, its external-content FTS5 table `chunks_fts` (kept in sync
//! by triggers), `meta`, and `sync_state`. All DDL uses `IF NOT EXISTS` so
//! initialization is idempotent.

use rusqlite::Connection;

/// Value of the `schema_version` meta key written on creation.
pub const CURRENT_SCHEMA_VERSION: &str = "1";

const SCHEMA_SQL: &str = r#"
-- Projected chunks
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    type TEXT NOT NULL,
    memory_type TEXT,
    entities TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 0.8,
    source_file TEXT NOT NULL,
    timestamp TEXT NOT NULL DEFAULT '',
    embedding BLOB
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_file);
CREATE INDEX IF NOT EXISTS idx_chunks_type ON chunks(type);

-- Full-text search (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    entities,
    type,
    content='chunks',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content, entities, type)
    VALUES (new.rowid, new.content, new.entities, new.type);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, entities, type)
    VALUES ('delete', old.rowid, old.content, old.entities, old.type);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, entities, type)
    VALUES ('delete', old.rowid, old.content, old.entities, old.type);
    INSERT INTO chunks_fts(rowid, content, entities, type)
    VALUES (new.rowid, new.content, new.entities, new.type);
END;

-- Small key/value metadata
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Per-source sync cursors
CREATE TABLE IF NOT EXISTS sync_state (
    source_file TEXT PRIMARY KEY,
    last_line INTEGER NOT NULL DEFAULT 0,
    last_id TEXT NOT NULL DEFAULT '',
    last_mtime INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL DEFAULT ''
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Stored schema version, if the meta row exists.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}
