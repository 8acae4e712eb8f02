//! Append-only JSON-lines event log: the source of truth.
//!
//! One file per UTC day under `daily/`, plus the aggregate `sessions.jsonl`.
//! File names are derived from the date, so finding "today" never needs a
//! directory listing. Readers skip lines that do not parse, which tolerates a
//! torn final line left by a crash mid-append.

pub mod manage;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{MemoryError, Result};
use crate::memory::types::{EntryKind, EntrySource, MemoryEntry, MemoryType, SessionSummary};

pub const DAILY_DIR: &str = "daily";
pub const SESSIONS_FILE: &str = "sessions.jsonl";
pub const CORE_DOCUMENT: &str = "MEMORY.md";
pub const INDEX_FILE: &str = "index.sqlite";

/// Append one record as a single JSON line.
///
/// The line and its terminating newline go out in one `write_all` on a file
/// opened in append mode, so a crash can corrupt at most the unterminated tail.
/// A tail left unterminated by an earlier crash is closed off first, so the
/// new record never merges into it.
pub fn append<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MemoryError::io("create directory", parent, e))?;
    }
    let record = serde_json::to_string(record)?;

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| MemoryError::io("open for append", path, e))?;

    let torn = ends_unterminated(&mut file).map_err(|e| MemoryError::io("inspect tail", path, e))?;
    let mut line = String::with_capacity(record.len() + 2);
    if torn {
        line.push('\n');
    }
    line.push_str(&record);
    line.push('\n');

    file.write_all(line.as_bytes())
        .map_err(|e| MemoryError::io("append", path, e))?;
    Ok(())
}

/// `true` when the file is non-empty and its last byte is not a newline.
fn ends_unterminated(file: &mut std::fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Read every parseable record. A missing file reads as empty.
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MemoryError::io("open", path, e)),
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            // Invalid UTF-8 is a damaged line, not a damaged file.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                skipped += 1;
                continue;
            }
            Err(e) => return Err(MemoryError::io("read", path, e)),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "skipped unparseable log lines");
    }
    Ok(records)
}

/// Last parseable record, or `None` for a missing or empty file.
pub fn read_last<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    Ok(read_all(path)?.pop())
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn iso_now() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Current UTC date as `YYYY-MM-DD`.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Time-sortable unique id with a readable prefix, e.g. `log-0192...`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::now_v7())
}

/// Arguments for [`EventLog::save_fact`].
#[derive(Debug, Clone)]
pub struct NewFact {
    pub content: String,
    pub memory_type: MemoryType,
    pub entities: Vec<String>,
    pub confidence: f64,
    pub session: Option<String>,
}

/// Arguments for [`EventLog::save_summary`].
#[derive(Debug, Clone, Default)]
pub struct NewSummary {
    pub session_id: Option<String>,
    pub topic: String,
    pub summary: String,
    pub decisions: Vec<String>,
    pub todos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Saved { id: String },
    AlreadySaved { session_id: String },
}

/// Handle on a data directory's logs.
#[derive(Debug, Clone)]
pub struct EventLog {
    root: PathBuf,
}

impl EventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.root.join(DAILY_DIR)
    }

    pub fn daily_path(&self, day: NaiveDate) -> PathBuf {
        self.daily_dir().join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    pub fn today_path(&self) -> PathBuf {
        self.daily_path(today())
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.root.join(SESSIONS_FILE)
    }

    pub fn core_document_path(&self) -> PathBuf {
        self.root.join(CORE_DOCUMENT)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Existing daily log files, oldest first.
    pub fn daily_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.daily_dir();
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::io("list", &dir, e)),
        };

        let mut files: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn read_day(&self, day: NaiveDate) -> Result<Vec<MemoryEntry>> {
        read_all(&self.daily_path(day))
    }

    pub fn read_sessions(&self) -> Result<Vec<SessionSummary>> {
        read_all(&self.sessions_path())
    }

    /// The newest summary that has not been soft-deleted.
    pub fn last_summary(&self) -> Result<Option<SessionSummary>> {
        Ok(self.read_sessions()?.into_iter().rev().find(|s| !s.is_deleted()))
    }

    /// Append an entry to today's log.
    pub fn append_entry(&self, entry: &MemoryEntry) -> Result<()> {
        append(&self.today_path(), entry)
    }

    pub fn save_fact(&self, fact: NewFact) -> Result<MemoryEntry> {
        if fact.content.trim().is_empty() {
            return Err(MemoryError::invalid_input("fact content must not be empty"));
        }
        if !(0.0..=1.0).contains(&fact.confidence) {
            return Err(MemoryError::invalid_input("confidence must be between 0.0 and 1.0"));
        }

        let entry = MemoryEntry {
            id: new_id("log"),
            kind: EntryKind::Fact,
            memory_type: Some(fact.memory_type),
            content: fact.content,
            entities: fact.entities,
            confidence: Some(fact.confidence),
            timestamp: iso_now(),
            source: fact.session.map(|s| EntrySource { session: Some(s) }),
            extra: serde_json::Map::new(),
        };
        self.append_entry(&entry)?;
        tracing::info!(id = %entry.id, memory_type = %fact.memory_type, "fact saved");
        Ok(entry)
    }

    /// Append a session summary, unless one already exists for the same session.
    pub fn save_summary(&self, new: NewSummary) -> Result<SummaryOutcome> {
        if new.summary.trim().is_empty() {
            return Err(MemoryError::invalid_input("summary must not be empty"));
        }
        let session_id = new.session_id.unwrap_or_default();
        if !session_id.is_empty()
            && self
                .read_sessions()?
                .iter()
                .any(|s| s.session_id == session_id && !s.is_deleted())
        {
            tracing::info!(session_id = %session_id, "summary already saved, skipping");
            return Ok(SummaryOutcome::AlreadySaved { session_id });
        }

        let record = SessionSummary {
            id: new_id("sum"),
            session_id,
            topic: new.topic,
            summary: new.summary,
            decisions: new.decisions,
            todos: new.todos,
            timestamp: iso_now(),
            extra: serde_json::Map::new(),
        };
        append(&self.sessions_path(), &record)?;
        tracing::info!(id = %record.id, "session summary saved");
        Ok(SummaryOutcome::Saved { id: record.id })
    }

    pub fn record_session_start(&self, session_id: &str, workspace: Option<&str>) -> Result<MemoryEntry> {
        let mut extra = serde_json::Map::new();
        extra.insert("session_id".into(), session_id.into());
        if let Some(ws) = workspace {
            extra.insert("workspace".into(), ws.into());
        }
        self.record_lifecycle(EntryKind::SessionStart, String::new(), extra)
    }

    pub fn record_session_end(
        &self,
        session_id: &str,
        reason: &str,
        duration_ms: Option<u64>,
    ) -> Result<MemoryEntry> {
        let mut extra = serde_json::Map::new();
        extra.insert("session_id".into(), session_id.into());
        extra.insert("reason".into(), reason.into());
        if let Some(ms) = duration_ms {
            extra.insert("duration_ms".into(), ms.into());
        }
        self.record_lifecycle(EntryKind::SessionEnd, String::new(), extra)
    }

    pub fn record_warning(&self, content: String, session_id: &str) -> Result<MemoryEntry> {
        let mut extra = serde_json::Map::new();
        extra.insert("session_id".into(), session_id.into());
        self.record_lifecycle(EntryKind::Warning, content, extra)
    }

    fn record_lifecycle(
        &self,
        kind: EntryKind,
        content: String,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry {
            id: new_id("log"),
            kind,
            memory_type: None,
            content,
            entities: Vec::new(),
            confidence: None,
            timestamp: iso_now(),
            source: None,
            extra,
        };
        self.append_entry(&entry)?;
        tracing::debug!(id = %entry.id, kind = kind.as_str(), "lifecycle entry recorded");
        Ok(entry)
    }
}
