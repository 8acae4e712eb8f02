//! CLI `doctor` command: check the logs and the index and report findings.

use anyhow::Result;
use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::config::MnemeConfig;
use crate::db::schema::{get_schema_version, CURRENT_SCHEMA_VERSION};
use crate::embedding::local::{model_dir, MODEL_FILE, TOKENIZER_FILE};
use crate::journal::EventLog;
use crate::memory::stats::scan_logs;
use crate::memory::sync::Source;
use crate::memory::types::MemoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub data_dir: String,
    /// `false` when any check failed. Warnings do not count.
    pub healthy: bool,
    pub checks: Vec<Check>,
}

impl DoctorReport {
    fn push(&mut self, name: &'static str, status: CheckStatus, detail: impl Into<String>) {
        self.checks.push(Check {
            name,
            status,
            detail: detail.into(),
        });
    }
}

pub fn doctor(config: &MnemeConfig) -> Result<DoctorReport> {
    let data_dir = config.resolved_data_dir();
    let log = EventLog::new(&data_dir);
    let mut report = DoctorReport {
        data_dir: data_dir.display().to_string(),
        healthy: true,
        checks: Vec::new(),
    };

    check_logs(&log, &mut report)?;
    check_index(&log, &mut report)?;
    check_model(config, &mut report);

    report.healthy = report.checks.iter().all(|c| c.status != CheckStatus::Fail);
    Ok(report)
}

fn check_logs(log: &EventLog, report: &mut DoctorReport) -> Result<()> {
    let scans = scan_logs(log)?;
    let lines: usize = scans.iter().map(|s| s.lines).sum();
    let parse_errors: usize = scans.iter().map(|s| s.parse_errors).sum();
    let duplicates: Vec<&str> = scans
        .iter()
        .flat_map(|s| s.duplicate_ids.iter().map(String::as_str))
        .collect();

    let status = if parse_errors > 0 { CheckStatus::Warn } else { CheckStatus::Ok };
    report.push(
        "log_parse",
        status,
        format!("{lines} lines in {} files, {parse_errors} unparseable", scans.len()),
    );

    if duplicates.is_empty() {
        report.push("log_ids", CheckStatus::Ok, "all ids unique");
    } else {
        report.push(
            "log_ids",
            CheckStatus::Warn,
            format!("{} duplicate ids: {}", duplicates.len(), duplicates.join(", ")),
        );
    }
    Ok(())
}

fn check_index(log: &EventLog, report: &mut DoctorReport) -> Result<()> {
    let path = log.index_path();
    if !path.exists() {
        report.push("index", CheckStatus::Warn, "not built yet; run `mneme sync`");
        return Ok(());
    }

    let conn = match crate::db::open_index_readonly(&path) {
        Ok(c) => c,
        Err(e) => {
            report.push("index", CheckStatus::Fail, format!("cannot open {}: {e}", path.display()));
            return Ok(());
        }
    };

    match get_schema_version(&conn)? {
        Some(v) if v == CURRENT_SCHEMA_VERSION => report.push("schema_version", CheckStatus::Ok, v),
        Some(v) => report.push(
            "schema_version",
            CheckStatus::Fail,
            // A rebuild keeps the existing tables and meta row, so only a fresh file helps.
            format!(
                "found {v}, expected {CURRENT_SCHEMA_VERSION}; delete {} and run `mneme sync`",
                path.display()
            ),
        ),
        None => report.push("schema_version", CheckStatus::Fail, "missing"),
    }

    let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
    report.push("index", CheckStatus::Ok, format!("{chunks} chunks at {}", path.display()));

    // Lag: entries in the newest daily log beyond its cursor.
    let Some(newest) = log.daily_files()?.pop() else {
        return Ok(());
    };
    let source = Source::daily(newest);
    let entries: Vec<MemoryEntry> = crate::journal::read_all(&source.path)?;
    let synced: Option<i64> = conn
        .query_row(
            "SELECT last_line FROM sync_state WHERE source_file = ?1",
            [&source.key],
            |r| r.get(0),
        )
        .optional()?;
    let synced = synced.map_or(0, |n| n.max(0) as usize);
    let behind = entries.len().saturating_sub(synced);
    if behind == 0 {
        report.push("index_lag", CheckStatus::Ok, format!("{} is fully synced", source.key));
    } else {
        report.push(
            "index_lag",
            CheckStatus::Warn,
            format!("{} has {behind} unsynced entries; run `mneme sync`", source.key),
        );
    }
    Ok(())
}

fn check_model(config: &MnemeConfig, report: &mut DoctorReport) {
    if config.embedding.provider != "local" {
        report.push("embedding", CheckStatus::Ok, "disabled; keyword search only");
        return;
    }
    let dir = model_dir(&config.embedding);
    let missing: Vec<&str> = [MODEL_FILE, TOKENIZER_FILE]
        .into_iter()
        .filter(|f| !dir.join(f).exists())
        .collect();
    if missing.is_empty() {
        report.push("embedding", CheckStatus::Ok, format!("{} at {}", config.embedding.model, dir.display()));
    } else {
        report.push(
            "embedding",
            CheckStatus::Warn,
            format!(
                "missing {} in {}; run `mneme model download` (keyword search still works)",
                missing.join(", "),
                dir.display()
            ),
        );
    }
}
