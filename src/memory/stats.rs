use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::journal::EventLog;

/// Entry counts across the whole data directory. Soft-deleted records are
/// counted in `deleted_entries` and nowhere else.
#[derive(Debug, Default, Serialize)]
pub struct LogStats {
    pub daily_files: usize,
    pub total_entries: usize,
    pub deleted_entries: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_memory_type: BTreeMap<String, usize>,
    pub session_summaries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_day: Option<String>,
}

/// Line-level health of one log file, counted without the tolerant reader so
/// skipped lines become visible.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FileScan {
    pub file: String,
    pub lines: usize,
    pub parse_errors: usize,
    pub duplicate_ids: Vec<String>,
    #[serde(skip)]
    ids: Vec<String>,
}

pub fn log_stats(log: &EventLog) -> Result<LogStats> {
    let files = log.daily_files()?;
    let mut stats = LogStats {
        daily_files: files.len(),
        first_day: files.first().and_then(|p| day_of(p)),
        last_day: files.last().and_then(|p| day_of(p)),
        ..Default::default()
    };

    for path in &files {
        let entries: Vec<crate::memory::types::MemoryEntry> = crate::journal::read_all(path)?;
        for entry in entries {
            if entry.is_deleted() {
                stats.deleted_entries += 1;
                continue;
            }
            stats.total_entries += 1;
            *stats.by_type.entry(entry.kind.as_str().to_string()).or_default() += 1;
            if let Some(mt) = entry.memory_type {
                *stats.by_memory_type.entry(mt.as_str().to_string()).or_default() += 1;
            }
        }
    }

    for summary in log.read_sessions()? {
        if summary.is_deleted() {
            stats.deleted_entries += 1;
        } else {
            stats.session_summaries += 1;
        }
    }
    Ok(stats)
}

fn day_of(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Count lines, unparseable lines, and ids repeated within the file.
pub fn scan_file(path: &Path) -> Result<FileScan> {
    let mut scan = FileScan {
        file: path.display().to_string(),
        ..Default::default()
    };
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scan),
        Err(e) => return Err(MemoryError::io("read", path, e)),
    };

    let mut seen = HashSet::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        scan.lines += 1;
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                    if !seen.insert(id.to_string()) {
                        scan.duplicate_ids.push(id.to_string());
                    }
                    scan.ids.push(id.to_string());
                }
            }
            Err(_) => scan.parse_errors += 1,
        }
    }
    Ok(scan)
}

/// Scan every daily log plus the sessions file. Ids duplicated across
/// different files are reported on the later file.
pub fn scan_logs(log: &EventLog) -> Result<Vec<FileScan>> {
    let mut paths = log.daily_files()?;
    paths.push(log.sessions_path());

    let mut seen = HashSet::new();
    let mut scans = Vec::with_capacity(paths.len());
    for path in paths {
        let mut scan = scan_file(&path)?;
        for id in &scan.ids {
            if !seen.insert(id.clone()) && !scan.duplicate_ids.contains(id) {
                scan.duplicate_ids.push(id.clone());
            }
        }
        scans.push(scan);
    }
    Ok(scans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{NewFact, NewSummary};
    use crate::memory::types::MemoryType;

    #[test]
    fn counts_by_type_and_memory_type() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        for (content, mt) in [("a", MemoryType::W), ("b", MemoryType::O), ("c", MemoryType::W)] {
            log.save_fact(NewFact {
                content: content.into(),
                memory_type: mt,
                entities: vec![],
                confidence: 0.8,
                session: None,
            })
            .unwrap();
        }
        log.record_session_start("s1", None).unwrap();
        log.save_summary(NewSummary {
            summary: "x".into(),
            ..Default::default()
        })
        .unwrap();

        let stats = log_stats(&log).unwrap();
        assert_eq!(stats.daily_files, 1);
        assert_eq!(stats.total_entries, 4);
        assert_eq!(stats.by_type["fact"], 3);
        assert_eq!(stats.by_type["session_start"], 1);
        assert_eq!(stats.by_memory_type["W"], 2);
        assert_eq!(stats.session_summaries, 1);
        assert_eq!(stats.first_day, stats.last_day);
    }

    #[test]
    fn soft_deleted_records_are_counted_apart() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = EventLog::new(tmp.path());
        std::fs::create_dir_all(log.daily_dir()).unwrap();
        std::fs::write(
            log.daily_path(crate::journal::today()),
            concat!(
                "{\"id\":\"a\",\"type\":\"fact\",\"memory_type\":\"W\",\"content\":\"live\",\"timestamp\":\"2026-03-01T10:00:00Z\"}\n",
                "{\"id\":\"b\",\"type\":\"fact\",\"memory_type\":\"W\",\"content\":\"hidden\",\"timestamp\":\"2026-03-01T10:00:01Z\",\"deleted_at\":\"2026-03-02T00:00:00Z\"}\n",
            ),
        )
        .unwrap();
        std::fs::write(
            log.sessions_path(),
            "{\"id\":\"sum-1\",\"summary\":\"x\",\"deleted_at\":\"2026-03-02T00:00:00Z\"}\n",
        )
        .unwrap();

        let stats = log_stats(&log).unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.by_memory_type["W"], 1);
        assert_eq!(stats.deleted_entries, 2);
        assert_eq!(stats.session_summaries, 0);
    }

    #[test]
    fn scan_reports_bad_lines_and_duplicates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"a\"}\n{\"id\":\"b\"}\n{\"id\":\"a\"}\n{\"id\":\"c\", \"trunc",
        )
        .unwrap();

        let scan = scan_file(&path).unwrap();
        assert_eq!(scan.lines, 4);
        assert_eq!(scan.parse_errors, 1);
        assert_eq!(scan.duplicate_ids, vec!["a".to_string()]);
    }

    #[test]
    fn missing_file_scans_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let scan = scan_file(&tmp.path().join("nope.jsonl")).unwrap();
        assert_eq!(scan.lines, 0);
    }
}
