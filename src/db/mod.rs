pub mod inspect;
pub mod schema;

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use crate::error::{MemoryError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the index database at the given path with the schema
/// initialized.
pub fn open_index(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MemoryError::io("create directory", parent, e))?;
    }

    let conn = Connection::open(path)?;

    // WAL lets readers run while a sync is writing
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    schema::init_schema(&conn)?;

    tracing::debug!(path = %path.display(), "index opened");
    Ok(conn)
}

/// Open an existing index for reading only. Never creates the file.
pub fn open_index_readonly(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(MemoryError::IndexNotFound {
            path: path.to_path_buf(),
        });
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Open an in-memory index for testing.
pub fn open_memory_index() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_parent_and_schema() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.sqlite");
        let conn = open_index(&path).unwrap();
        assert!(path.is_file());

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert_eq!(
            schema::get_schema_version(&conn).unwrap().as_deref(),
            Some(schema::CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn readonly_open_requires_existing_file() {
        let tmp = TempDir::new().unwrap();
        let err = open_index_readonly(tmp.path().join("missing.sqlite")).unwrap_err();
        assert_eq!(err.code(), crate::error::DB_NOT_FOUND);
        assert!(!tmp.path().join("missing.sqlite").exists());
    }

    #[test]
    fn readonly_connection_refuses_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        drop(open_index(&path).unwrap());

        let ro = open_index_readonly(&path).unwrap();
        assert!(ro
            .execute("INSERT INTO meta (key, value) VALUES ('x', 'y')", [])
            .is_err());
    }
}
