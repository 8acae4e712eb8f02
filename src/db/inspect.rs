//! Read-only introspection over an index connection.
//!
//! Used by the `db` subcommands. Binary columns are never returned raw; they
//! render as `"<blob N bytes>"`. [`query_readonly`] refuses any statement that
//! SQLite does not classify as read-only, before stepping it.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{MemoryError, Result};

/// Shadow tables FTS5 creates next to every full-text table.
const FTS_SHADOW_SUFFIXES: &[&str] = &["_config", "_docsize", "_data", "_idx", "_content"];

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub rows: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub notnull: bool,
    pub pk: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDump {
    pub table: String,
    pub total: i64,
    pub offset: usize,
    pub limit: usize,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub sql: String,
    pub columns: Vec<String>,
    pub count: usize,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: i64,
    pub with_embedding: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_memory_type: BTreeMap<String, i64>,
    pub synced_files: i64,
    pub meta: BTreeMap<String, String>,
}

/// User-visible tables and views, without SQLite internals and FTS shadows.
pub fn list_tables(conn: &Connection) -> Result<Vec<TableInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name",
    )?;
    let entries = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tables = Vec::new();
    for (name, kind) in entries {
        if name.starts_with("sqlite_") || FTS_SHADOW_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        let rows: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
            [],
            |r| r.get(0),
        )?;
        tables.push(TableInfo { name, kind, rows });
    }
    Ok(tables)
}

/// Column names and declared types of `table`.
pub fn describe_table(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let table = ensure_table(conn, table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get("name")?,
                column_type: row.get("type")?,
                notnull: row.get::<_, i64>("notnull")? != 0,
                pk: row.get::<_, i64>("pk")? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// A page of rows from `table`, plus the table's total row count.
pub fn dump_rows(conn: &Connection, table: &str, limit: usize, offset: usize) -> Result<TableDump> {
    let table = ensure_table(conn, table)?;
    let ident = quote_ident(&table);

    let total: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {ident}"), [], |r| r.get(0))?;

    let order = match table.as_str() {
        "chunks" => "ORDER BY timestamp DESC",
        "sync_state" => "ORDER BY synced_at DESC",
        _ => "",
    };
    let mut stmt = conn.prepare(&format!("SELECT * FROM {ident} {order} LIMIT ?1 OFFSET ?2"))?;
    let columns = column_names(&stmt);
    let rows = stmt
        .query_map([limit as i64, offset as i64], |row| row_to_map(row, &columns))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(TableDump {
        table,
        total,
        offset,
        limit,
        rows,
    })
}

/// Run one ad-hoc statement, provided SQLite classifies it as read-only.
pub fn query_readonly(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(MemoryError::invalid_input("query must not be empty"));
    }

    let mut stmt = conn.prepare(sql).map_err(|e| MemoryError::Sql {
        message: e.to_string(),
    })?;
    if !stmt.readonly() {
        return Err(MemoryError::ReadOnly { sql: sql.to_string() });
    }

    let columns = column_names(&stmt);
    let rows = stmt
        .query_map([], |row| row_to_map(row, &columns))
        .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| MemoryError::Sql {
            message: e.to_string(),
        })?;

    Ok(QueryResult {
        sql: sql.to_string(),
        count: rows.len(),
        columns,
        rows,
    })
}

/// Chunk counts by type, embedding coverage, cursor count and all meta keys.
pub fn index_stats(conn: &Connection) -> Result<IndexStats> {
    let total_chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
    let with_embedding: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let by_type = grouped_counts(conn, "SELECT type, COUNT(*) FROM chunks GROUP BY type")?;
    let by_memory_type = grouped_counts(
        conn,
        "SELECT memory_type, COUNT(*) FROM chunks WHERE memory_type IS NOT NULL GROUP BY memory_type",
    )?;
    let synced_files: i64 = conn.query_row("SELECT COUNT(*) FROM sync_state", [], |r| r.get(0))?;

    let mut stmt = conn.prepare("SELECT key, value FROM meta ORDER BY key")?;
    let meta = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

    Ok(IndexStats {
        total_chunks,
        with_embedding,
        by_type,
        by_memory_type,
        synced_files,
        meta,
    })
}

fn grouped_counts(conn: &Connection, sql: &str) -> Result<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let counts = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(counts)
}

/// Resolve `table` against `sqlite_master`, so it is never interpolated unchecked.
fn ensure_table(conn: &Connection, table: &str) -> Result<String> {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |r| r.get::<_, String>(0),
    )
    .optional()?
    .ok_or_else(|| MemoryError::TableNotFound {
        table: table.to_string(),
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn row_to_map(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Map<String, Value>> {
    let mut map = Map::with_capacity(columns.len());
    for (i, name) in columns.iter().enumerate() {
        map.insert(name.clone(), render_value(row.get_ref(i)?));
    }
    Ok(map)
}

fn render_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_index;

    fn seeded() -> Connection {
        let conn = open_memory_index().unwrap();
        conn.execute(
            "INSERT INTO chunks (id, content, type, memory_type, source_file, timestamp, embedding)
             VALUES ('log-1', 'rust is fast', 'fact', 'W', 'daily/2026-03-01.jsonl', '2026-03-01T10:00:00Z', ?1)",
            [vec![0u8; 16]],
        )
        .unwrap();
        conn
    }

    #[test]
    fn list_tables_hides_internals() {
        let conn = seeded();
        let tables = list_tables(&conn).unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"chunks"));
        assert!(names.contains(&"chunks_fts"));
        assert!(names.contains(&"meta"));
        assert!(names.contains(&"sync_state"));
        assert!(!names.iter().any(|n| n.ends_with("_docsize") || n.starts_with("sqlite_")));
        let chunks = tables.iter().find(|t| t.name == "chunks").unwrap();
        assert_eq!(chunks.rows, 1);
    }

    #[test]
    fn describe_known_and_unknown_table() {
        let conn = seeded();
        let cols = describe_table(&conn, "chunks").unwrap();
        let id = cols.iter().find(|c| c.name == "id").unwrap();
        assert!(id.pk);
        assert!(cols.iter().any(|c| c.name == "embedding" && c.column_type == "BLOB"));

        let err = describe_table(&conn, "nope").unwrap_err();
        assert_eq!(err.code(), crate::error::TABLE_NOT_FOUND);
        assert!(err.is_validation());
    }

    #[test]
    fn dump_redacts_blobs() {
        let conn = seeded();
        let dump = dump_rows(&conn, "chunks", 10, 0).unwrap();
        assert_eq!(dump.total, 1);
        assert_eq!(dump.rows[0]["embedding"], "<blob 16 bytes>");
        assert_eq!(dump.rows[0]["content"], "rust is fast");

        let page = dump_rows(&conn, "chunks", 10, 5).unwrap();
        assert_eq!(page.total, 1);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn query_allows_reads_and_rejects_writes() {
        let conn = seeded();
        let res = query_readonly(&conn, "SELECT id, embedding FROM chunks").unwrap();
        assert_eq!(res.columns, vec!["id", "embedding"]);
        assert_eq!(res.count, 1);
        assert_eq!(res.rows[0]["embedding"], "<blob 16 bytes>");

        for sql in [
            "DELETE FROM chunks",
            "INSERT INTO meta (key, value) VALUES ('a', 'b')",
            "DROP TABLE chunks",
        ] {
            let err = query_readonly(&conn, sql).unwrap_err();
            assert_eq!(err.code(), crate::error::READONLY, "{sql}");
            assert_eq!(err.exit_code(), crate::error::EXIT_VALIDATION);
        }
        // Nothing was executed.
        assert_eq!(index_stats(&conn).unwrap().total_chunks, 1);
    }

    #[test]
    fn query_syntax_error_is_sql_error() {
        let conn = seeded();
        let err = query_readonly(&conn, "SELEC nonsense").unwrap_err();
        assert_eq!(err.code(), crate::error::SQL_ERROR);
    }

    #[test]
    fn stats_group_by_type() {
        let conn = seeded();
        let stats = index_stats(&conn).unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.with_embedding, 1);
        assert_eq!(stats.by_type["fact"], 1);
        assert_eq!(stats.by_memory_type["W"], 1);
        assert_eq!(stats.meta["schema_version"], "1");
    }
}
