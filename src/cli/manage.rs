//! CLI `delete`, `restore` and `purge`: rewrite logs under the management lock.

use std::collections::HashSet;

use anyhow::Result;

use crate::config::MnemeConfig;
use crate::error::MemoryError;
use crate::journal::manage::{purge as purge_ids, restore as restore_ids, soft_delete, MarkReport, PurgeReport};
use crate::journal::EventLog;
use crate::lock::{hold, FileLock};
use crate::memory::store::IndexStore;
use crate::memory::sync::invalidate_rewritten;

/// Actor recorded on records deleted from the command line.
pub const CLI_ACTOR: &str = "cli";

fn id_set(ids: Vec<String>) -> Result<HashSet<String>> {
    let ids: HashSet<String> = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(MemoryError::invalid_input("at least one id is required").into());
    }
    Ok(ids)
}

/// Mark entries deleted. Their chunks leave the index immediately.
pub fn delete(config: &MnemeConfig, ids: Vec<String>) -> Result<MarkReport> {
    let ids = id_set(ids)?;
    let data_dir = config.resolved_data_dir();
    let log = EventLog::new(&data_dir);
    let mut lock = FileLock::for_data_dir(&data_dir, &config.lock);
    let held = hold(&mut lock)?;

    let report = soft_delete(&log, &ids, CLI_ACTOR, &held)?;
    if report.changed > 0 {
        refresh_index(&log, &report, &ids)?;
    }
    if report.changed < ids.len() {
        tracing::warn!(requested = ids.len(), deleted = report.changed, "some ids were not found or already deleted");
    }
    Ok(report)
}

/// Clear deletion markers. Restored entries return to the index on the next sync.
pub fn restore(config: &MnemeConfig, ids: Vec<String>) -> Result<MarkReport> {
    let ids = id_set(ids)?;
    let data_dir = config.resolved_data_dir();
    let log = EventLog::new(&data_dir);
    let mut lock = FileLock::for_data_dir(&data_dir, &config.lock);
    let held = hold(&mut lock)?;

    let report = restore_ids(&log, &ids, &held)?;
    if report.changed > 0 {
        refresh_index(&log, &report, &HashSet::new())?;
    }
    if report.changed < ids.len() {
        tracing::warn!(requested = ids.len(), restored = report.changed, "some ids were not found or not deleted");
    }
    Ok(report)
}

pub fn purge(config: &MnemeConfig, ids: Vec<String>) -> Result<PurgeReport> {
    let ids = id_set(ids)?;
    let data_dir = config.resolved_data_dir();
    let log = EventLog::new(&data_dir);
    let mut lock = FileLock::for_data_dir(&data_dir, &config.lock);
    let held = hold(&mut lock)?;
    let report = purge_ids(&log, &ids, &held)?;

    if report.purged < ids.len() {
        tracing::warn!(requested = ids.len(), purged = report.purged, "some ids were not found");
    }
    Ok(report)
}

/// Rewrites keep line counts and ids, so the sync cursor cannot notice them.
/// A missing index has nothing to invalidate.
fn refresh_index(log: &EventLog, report: &MarkReport, hidden: &HashSet<String>) -> Result<()> {
    let path = log.index_path();
    if !path.exists() {
        return Ok(());
    }
    let mut store = IndexStore::open(&path)?;
    invalidate_rewritten(&mut store, log, &report.affected_paths, hidden)?;
    Ok(())
}
