//! The derived index: chunks, full-text shadow, metadata and sync cursors.
//!
//! [`IndexStore`] owns one SQLite connection. Every write is an upsert keyed by
//! chunk id, so projecting the same entry twice never grows the store. Upserts
//! go through `ON CONFLICT DO UPDATE` rather than `INSERT OR REPLACE`, because
//! REPLACE deletes without firing the delete trigger and would leave stale
//! rows in `chunks_fts`.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use super::{bytes_to_embedding, embedding_to_bytes};
use crate::db;
use crate::error::Result;
use crate::memory::types::{Chunk, ChunkType, MemoryType, SyncCursor, TimeRange};

const CHUNK_COLUMNS: &str =
    "c.id, c.content, c.type, c.memory_type, c.entities, c.confidence, c.source_file, c.timestamp, c.embedding";

/// Well-known `meta` keys.
pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_LAST_SYNC: &str = "last_sync";
pub const META_TOTAL_CHUNKS: &str = "total_chunks";
pub const META_EMBEDDING_MODEL: &str = "embedding_model";

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    /// Open (or create) the index file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: db::open_index(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: db::open_memory_index()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ── Chunks ────────────────────────────────────────────────────────────────

    pub fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        upsert(&self.conn, chunk)?;
        Ok(())
    }

    /// Upsert a batch of chunks and advance the source's cursor in one
    /// transaction, so a crash never leaves the cursor ahead of the data.
    pub fn commit_projection(&mut self, chunks: &[Chunk], cursor: &SyncCursor) -> Result<()> {
        let tx = self.conn.transaction()?;
        for chunk in chunks {
            upsert(&tx, chunk)?;
        }
        write_cursor(&tx, cursor)?;
        tx.commit()?;
        Ok(())
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let chunk = self
            .conn
            .query_row(
                &format!("SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.id = ?1"),
                [id],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    /// Remove every chunk projected from `source_file`.
    pub fn delete_source(&self, source_file: &str) -> Result<usize> {
        let n = self
            .conn
            .execute("DELETE FROM chunks WHERE source_file = ?1", [source_file])?;
        Ok(n)
    }

    /// Remove chunks by id. Returns how many existed.
    pub fn delete_chunks<'i>(&mut self, ids: impl IntoIterator<Item = &'i str>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM chunks WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// BM25-ranked full-text matches, best first. The score is SQLite's
    /// `bm25()`, where lower is better.
    ///
    /// Each whitespace-separated word is matched as a quoted term, so user input
    /// cannot inject FTS5 operators. Only chunks whose timestamp falls inside
    /// `range` are considered.
    pub fn search_keyword(
        &self,
        query: &str,
        limit: usize,
        range: &TimeRange,
    ) -> Result<Vec<(Chunk, f64)>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS}, bm25(chunks_fts) AS score \
             FROM chunks_fts JOIN chunks c ON c.rowid = chunks_fts.rowid \
             WHERE chunks_fts MATCH ?1 AND {} \
             ORDER BY score LIMIT ?2",
            time_filter(3)
        ))?;
        let results = stmt
            .query_map(
                params![escaped, limit as i64, range.from, range.to],
                |row| Ok((row_to_chunk(row)?, row.get::<_, f64>(9)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Every chunk inside `range` that carries an embedding.
    pub fn all_chunks_with_embedding(&self, range: &TimeRange) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c \
             WHERE c.embedding IS NOT NULL AND {}",
            time_filter(1)
        ))?;
        let chunks = stmt
            .query_map(params![range.from, range.to], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    // ── Meta ──────────────────────────────────────────────────────────────────

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    // ── Sync cursors ──────────────────────────────────────────────────────────

    pub fn get_sync_cursor(&self, source_file: &str) -> Result<Option<SyncCursor>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT source_file, last_line, last_id, last_mtime FROM sync_state WHERE source_file = ?1",
                [source_file],
                row_to_cursor,
            )
            .optional()?;
        Ok(cursor)
    }

    pub fn update_sync_cursor(
        &self,
        source_file: &str,
        last_line: usize,
        last_id: &str,
        last_mtime: i64,
    ) -> Result<()> {
        write_cursor(
            &self.conn,
            &SyncCursor {
                source_file: source_file.to_string(),
                last_line,
                last_id: last_id.to_string(),
                last_mtime,
            },
        )?;
        Ok(())
    }

    pub fn delete_sync_cursor(&self, source_file: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_state WHERE source_file = ?1", [source_file])?;
        Ok(())
    }

    pub fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_file, last_line, last_id, last_mtime FROM sync_state ORDER BY source_file",
        )?;
        let cursors = stmt
            .query_map([], row_to_cursor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cursors)
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn upsert(conn: &Connection, chunk: &Chunk) -> rusqlite::Result<()> {
    let entities = serde_json::to_string(&chunk.entities)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let embedding = chunk.embedding.as_deref().map(embedding_to_bytes);

    conn.execute(
        "INSERT INTO chunks (id, content, type, memory_type, entities, confidence, source_file, timestamp, embedding) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(id) DO UPDATE SET \
             content = excluded.content, \
             type = excluded.type, \
             memory_type = excluded.memory_type, \
             entities = excluded.entities, \
             confidence = excluded.confidence, \
             source_file = excluded.source_file, \
             timestamp = excluded.timestamp, \
             embedding = excluded.embedding",
        params![
            chunk.id,
            chunk.content,
            chunk.chunk_type.as_str(),
            chunk.memory_type.map(|m| m.as_str()),
            entities,
            chunk.confidence,
            chunk.source_file,
            chunk.timestamp,
            embedding,
        ],
    )?;
    Ok(())
}

fn write_cursor(conn: &Connection, cursor: &SyncCursor) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sync_state (source_file, last_line, last_id, last_mtime, synced_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(source_file) DO UPDATE SET \
             last_line = excluded.last_line, \
             last_id = excluded.last_id, \
             last_mtime = excluded.last_mtime, \
             synced_at = excluded.synced_at",
        params![
            cursor.source_file,
            cursor.last_line as i64,
            cursor.last_id,
            cursor.last_mtime,
            crate::journal::iso_now(),
        ],
    )?;
    Ok(())
}

/// Optional inclusive bounds on `c.timestamp`, bound as parameters `first`
/// (from) and `first + 1` (to). A NULL bound matches everything.
fn time_filter(first: usize) -> String {
    let to = first + 1;
    format!("(?{first} IS NULL OR c.timestamp >= ?{first}) AND (?{to} IS NULL OR c.timestamp <= ?{to})")
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let chunk_type: String = row.get(2)?;
    let memory_type: Option<String> = row.get(3)?;
    let entities: String = row.get(4)?;
    let embedding: Option<Vec<u8>> = row.get(8)?;

    Ok(Chunk {
        id: row.get(0)?,
        content: row.get(1)?,
        chunk_type: chunk_type
            .parse::<ChunkType>()
            .map_err(|e| conversion_error(2, e))?,
        memory_type: memory_type
            .map(|m| m.parse::<MemoryType>())
            .transpose()
            .map_err(|e| conversion_error(3, e))?,
        entities: serde_json::from_str(&entities).unwrap_or_default(),
        confidence: row.get(5)?,
        source_file: row.get(6)?,
        timestamp: row.get(7)?,
        embedding: embedding.map(|b| bytes_to_embedding(&b)),
    })
}

fn row_to_cursor(row: &Row<'_>) -> rusqlite::Result<SyncCursor> {
    Ok(SyncCursor {
        source_file: row.get(0)?,
        last_line: row.get::<_, i64>(1)?.max(0) as usize,
        last_id: row.get(2)?,
        last_mtime: row.get(3)?,
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Wraps each whitespace-delimited word in double quotes and joins with spaces
/// so FTS5 treats them as individual terms (implicit AND). Strips empty tokens.
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect::<Vec<_>>()
        .join(" ")
}
