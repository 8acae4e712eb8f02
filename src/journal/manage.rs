//! Destructive log maintenance: soft delete and restore, purge by id, and
//! whole-file replacement.
//!
//! These are the only operations that rewrite log files. Each one takes a
//! [`Held`] lock as proof that the caller owns the data directory's
//! [`ConcurrencyGuard`], rewrites through a temp file + rename, and leaves one
//! record in `audit/operations.jsonl`.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{append, iso_now, new_id, read_all, EventLog};
use crate::error::{MemoryError, Result};
use crate::lock::{ConcurrencyGuard, Held};
use crate::memory::types::DELETED_AT;

/// Who marked a record deleted.
pub const DELETED_BY: &str = "deleted_by";

pub const AUDIT_DIR: &str = "audit";
pub const AUDIT_FILE: &str = "operations.jsonl";

/// One management operation, as recorded in the audit trail.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct AuditRecord {
    pub op_id: String,
    pub timestamp: String,
    pub command: String,
    pub scope: Vec<String>,
    pub before_count: usize,
    pub after_count: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub purged: usize,
    pub affected_files: Vec<String>,
}

/// Outcome of a soft delete or restore.
#[derive(Debug, Clone, Serialize)]
pub struct MarkReport {
    /// Records whose deletion marker actually changed.
    pub changed: usize,
    pub affected_files: Vec<String>,
    #[serde(skip)]
    pub affected_paths: Vec<PathBuf>,
}

pub fn audit_path(log: &EventLog) -> PathBuf {
    log.root().join(AUDIT_DIR).join(AUDIT_FILE)
}

/// Atomically replace `path` with the given records, one JSON line each.
fn rewrite_atomic<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file =
            std::fs::File::create(&tmp).map_err(|e| MemoryError::io("create", &tmp, e))?;
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .map_err(|e| MemoryError::io("write", &tmp, e))?;
        file.sync_all().map_err(|e| MemoryError::io("sync", &tmp, e))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| MemoryError::io("rename", path, e))?;
    Ok(())
}

fn write_audit(log: &EventLog, record: &AuditRecord) {
    if let Err(e) = append(&audit_path(log), record) {
        tracing::warn!(error = %e, command = %record.command, "failed to write audit record");
    }
}

/// Mark every live record whose `id` is in `ids` as deleted. Records stay in
/// the log; readers skip them until they are restored.
pub fn soft_delete<G: ConcurrencyGuard + ?Sized>(
    log: &EventLog,
    ids: &HashSet<String>,
    actor: &str,
    held: &Held<'_, G>,
) -> Result<MarkReport> {
    let now = iso_now();
    mark(log, ids, "delete", held, |record| {
        if record.contains_key(DELETED_AT) {
            return false;
        }
        record.insert(DELETED_AT.into(), Value::String(now.clone()));
        record.insert(DELETED_BY.into(), Value::String(actor.to_string()));
        true
    })
}

/// Clear the deletion marker from every record whose `id` is in `ids`.
pub fn restore<G: ConcurrencyGuard + ?Sized>(
    log: &EventLog,
    ids: &HashSet<String>,
    held: &Held<'_, G>,
) -> Result<MarkReport> {
    mark(log, ids, "restore", held, |record| {
        record.remove(DELETED_BY);
        record.remove(DELETED_AT).is_some()
    })
}

/// Apply `edit` to each record in `ids` across every log and rewrite the files
/// where it reported a change.
fn mark<G, F>(
    log: &EventLog,
    ids: &HashSet<String>,
    command: &str,
    _held: &Held<'_, G>,
    mut edit: F,
) -> Result<MarkReport>
where
    G: ConcurrencyGuard + ?Sized,
    F: FnMut(&mut serde_json::Map<String, Value>) -> bool,
{
    let mut files = log.daily_files()?;
    files.push(log.sessions_path());

    let mut report = MarkReport {
        changed: 0,
        affected_files: Vec::new(),
        affected_paths: Vec::new(),
    };
    let mut before_live = 0usize;

    let result = (|| -> Result<()> {
        for path in &files {
            if !path.is_file() {
                continue;
            }
            let mut records: Vec<Value> = read_all(path)?;
            before_live += records.iter().filter(|r| r.get(DELETED_AT).is_none()).count();

            let mut changed = 0;
            for record in records.iter_mut().filter_map(Value::as_object_mut) {
                let listed = record
                    .get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| ids.contains(id));
                if listed && edit(record) {
                    changed += 1;
                }
            }
            if changed > 0 {
                rewrite_atomic(path, &records)?;
                report.changed += changed;
                report.affected_files.push(display_name(path));
                report.affected_paths.push(path.clone());
            }
        }
        Ok(())
    })();

    let after_live = match command {
        "restore" => before_live + report.changed,
        _ => before_live - report.changed,
    };
    write_audit(
        log,
        &AuditRecord {
            op_id: new_id("op"),
            timestamp: iso_now(),
            command: command.into(),
            scope: report.affected_files.clone(),
            before_count: before_live,
            after_count: after_live,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        },
    );
    result?;

    tracing::info!(command, changed = report.changed, files = report.affected_files.len(), "deletion markers updated");
    Ok(report)
}

/// Physically remove every entry whose `id` is in `ids`, across all daily logs
/// and the sessions log.
pub fn purge<G: ConcurrencyGuard + ?Sized>(
    log: &EventLog,
    ids: &HashSet<String>,
    _held: &Held<'_, G>,
) -> Result<PurgeReport> {
    let mut files = log.daily_files()?;
    files.push(log.sessions_path());

    let mut before_total = 0usize;
    let mut purged = 0usize;
    let mut affected_files = Vec::new();

    let result = (|| -> Result<()> {
        for path in &files {
            if !path.is_file() {
                continue;
            }
            let records: Vec<Value> = read_all(path)?;
            let before = records.len();
            before_total += before;
            let kept: Vec<Value> = records
                .into_iter()
                .filter(|r| {
                    r.get("id")
                        .and_then(Value::as_str)
                        .map_or(true, |id| !ids.contains(id))
                })
                .collect();
            let removed = before - kept.len();
            if removed > 0 {
                rewrite_atomic(path, &kept)?;
                purged += removed;
                affected_files.push(display_name(path));
            }
        }
        Ok(())
    })();

    write_audit(
        log,
        &AuditRecord {
            op_id: new_id("op"),
            timestamp: iso_now(),
            command: "purge".into(),
            scope: affected_files.clone(),
            before_count: before_total,
            after_count: before_total - purged,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        },
    );
    result?;

    tracing::info!(purged, files = affected_files.len(), "purge complete");
    Ok(PurgeReport {
        purged,
        affected_files,
    })
}

/// Replace one log file wholesale with `records`.
pub fn replace_file<T: Serialize, G: ConcurrencyGuard + ?Sized>(
    log: &EventLog,
    path: &Path,
    records: &[T],
    _held: &Held<'_, G>,
) -> Result<()> {
    let before: Vec<Value> = read_all(path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MemoryError::io("create directory", parent, e))?;
    }
    let result = rewrite_atomic(path, records);

    write_audit(
        log,
        &AuditRecord {
            op_id: new_id("op"),
            timestamp: iso_now(),
            command: "replace".into(),
            scope: vec![display_name(path)],
            before_count: before.len(),
            after_count: if result.is_ok() { records.len() } else { before.len() },
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        },
    );
    result?;

    tracing::info!(path = %path.display(), records = records.len(), "log file replaced");
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::NewFact;
    use crate::lock::{hold, FileLock, LOCK_FILE};
    use crate::memory::types::{MemoryEntry, MemoryType};
    use std::time::Duration;
    use tempfile::TempDir;

    fn save(log: &EventLog, content: &str) -> MemoryEntry {
        log.save_fact(NewFact {
            content: content.into(),
            memory_type: MemoryType::B,
            entities: vec![],
            confidence: 0.8,
            session: None,
        })
        .unwrap()
    }

    #[test]
    fn purge_removes_only_listed_ids_and_audits() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        let a = save(&log, "keep me");
        let b = save(&log, "drop me");

        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_secs(1));
        let held = hold(&mut lock).unwrap();
        let ids: HashSet<String> = [b.id.clone()].into_iter().collect();
        let report = purge(&log, &ids, &held).unwrap();
        drop(held);

        assert_eq!(report.purged, 1);
        assert_eq!(report.affected_files.len(), 1);
        let left: Vec<MemoryEntry> = read_all(&log.today_path()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, a.id);

        let audit: Vec<AuditRecord> = read_all(&audit_path(&log)).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].command, "purge");
        assert_eq!(audit[0].before_count, 2);
        assert_eq!(audit[0].after_count, 1);
        assert!(audit[0].success);
    }

    #[test]
    fn soft_delete_then_restore_round_trips_marker() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        let keep = save(&log, "stays visible");
        let gone = save(&log, "hidden for a while");
        let ids: HashSet<String> = [gone.id.clone(), "log-missing".to_string()].into_iter().collect();

        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_secs(1));
        let held = hold(&mut lock).unwrap();

        let deleted = soft_delete(&log, &ids, "tester", &held).unwrap();
        assert_eq!(deleted.changed, 1);
        assert_eq!(deleted.affected_paths, vec![log.today_path()]);
        let entries: Vec<MemoryEntry> = read_all(&log.today_path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_deleted());
        assert!(entries[1].is_deleted());
        assert_eq!(entries[1].extra[DELETED_BY], "tester");

        // Deleting again changes nothing and rewrites nothing.
        assert_eq!(soft_delete(&log, &ids, "tester", &held).unwrap().changed, 0);

        let restored = restore(&log, &ids, &held).unwrap();
        assert_eq!(restored.changed, 1);
        let entries: Vec<MemoryEntry> = read_all(&log.today_path()).unwrap();
        assert!(entries.iter().all(|e| !e.is_deleted() && e.extra.is_empty()));
        assert_eq!(entries[0].id, keep.id);

        let audit: Vec<AuditRecord> = read_all(&audit_path(&log)).unwrap();
        let commands: Vec<&str> = audit.iter().map(|a| a.command.as_str()).collect();
        assert_eq!(commands, ["delete", "delete", "restore"]);
        assert_eq!((audit[0].before_count, audit[0].after_count), (2, 1));
        assert_eq!((audit[2].before_count, audit[2].after_count), (1, 2));
    }

    #[test]
    fn soft_delete_reaches_session_summaries() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        let outcome = log
            .save_summary(crate::journal::NewSummary {
                session_id: Some("s-1".into()),
                summary: "wrapped up the parser".into(),
                ..Default::default()
            })
            .unwrap();
        let crate::journal::SummaryOutcome::Saved { id } = outcome else {
            panic!("expected a fresh summary");
        };

        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_secs(1));
        let held = hold(&mut lock).unwrap();
        let ids: HashSet<String> = [id].into_iter().collect();
        let report = soft_delete(&log, &ids, "tester", &held).unwrap();
        assert_eq!(report.affected_files, vec!["sessions.jsonl".to_string()]);
        assert!(log.last_summary().unwrap().is_none());
    }

    #[test]
    fn replace_file_swaps_contents() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        save(&log, "old one");
        save(&log, "old two");
        let replacement = vec![save(&log, "new")];

        let mut lock = FileLock::new(tmp.path().join(LOCK_FILE), Duration::from_secs(1));
        let held = hold(&mut lock).unwrap();
        replace_file(&log, &log.today_path(), &replacement, &held).unwrap();

        let left: Vec<MemoryEntry> = read_all(&log.today_path()).unwrap();
        assert_eq!(left, replacement);
        assert!(!log.today_path().with_extension("jsonl.tmp").exists());
    }
}
