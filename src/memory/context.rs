//! Session lifecycle: the context block injected at session start and the
//! housekeeping run when a session ends.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use super::recent::{format_fact_line, RecencySelector};
use super::store::IndexStore;
use super::sync::{IndexSyncer, SyncReport};
use super::types::{MemoryEntry, SessionSummary};
use crate::config::{IndexConfig, MnemeConfig, RecallConfig};
use crate::error::{MemoryError, Result};
use crate::journal::EventLog;

/// Written to `MEMORY.md` the first time context is loaded.
pub const CORE_DOCUMENT_SKELETON: &str =
    "# Core Memory\n\n## Preferences\n\n## Project Background\n\n## Key Decisions\n";

/// End reasons after which a missing summary is worth flagging.
const SUMMARY_EXPECTED_REASONS: &[&str] = &["completed", "user_close"];

#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub core_document: String,
    pub recent_facts: Vec<MemoryEntry>,
    pub last_session: Option<SessionSummary>,
}

impl SessionContext {
    /// Markdown block handed to the assistant. Empty sections are omitted.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();

        let core = self.core_document.trim();
        if !core.is_empty() {
            parts.push(format!("## Core Memory\n{core}"));
        }

        if !self.recent_facts.is_empty() {
            let lines: Vec<String> = self.recent_facts.iter().map(format_fact_line).collect();
            parts.push(format!("## Recent Facts\n{}", lines.join("\n")));
        }

        if let Some(last) = &self.last_session {
            let mut block = String::from("## Last Session");
            if !last.topic.is_empty() {
                block.push_str(&format!("\n- Topic: {}", last.topic));
            }
            if !last.summary.is_empty() {
                block.push_str(&format!("\n- Summary: {}", last.summary));
            }
            parts.push(block);
        }

        parts.join("\n\n")
    }
}

/// Create `MEMORY.md` from the skeleton if it does not exist. Returns `true`
/// when the file was created.
pub fn ensure_core_document(log: &EventLog) -> Result<bool> {
    let path = log.core_document_path();
    if path.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(log.root()).map_err(|e| MemoryError::io("create_dir", log.root(), e))?;
    std::fs::write(&path, CORE_DOCUMENT_SKELETON).map_err(|e| MemoryError::io("write", &path, e))?;
    tracing::info!(path = %path.display(), "created core memory document");
    Ok(true)
}

/// Assemble session-start context straight from the logs.
pub fn load_context(log: &EventLog, recall: &RecallConfig, today: NaiveDate) -> Result<SessionContext> {
    ensure_core_document(log)?;
    let path = log.core_document_path();
    let core_document = std::fs::read_to_string(&path).map_err(|e| MemoryError::io("read", &path, e))?;

    let recent_facts = RecencySelector::new(log, recall).select(today)?;
    let last_session = log.last_summary()?;

    tracing::debug!(
        facts = recent_facts.len(),
        has_last_session = last_session.is_some(),
        "session context loaded"
    );

    Ok(SessionContext {
        core_document,
        recent_facts,
        last_session,
    })
}

#[derive(Debug, Clone)]
pub struct SessionEnd {
    pub session_id: String,
    pub reason: String,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    TimedOut { after_secs: u64 },
    Failed { error: String },
}

#[derive(Debug, Serialize)]
pub struct EndSessionReport {
    pub session_end_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_id: Option<String>,
    pub sync: SyncOutcome,
}

/// Record the end of a session, flag a missing summary, then bring the index
/// up to date within `index.sync_timeout_secs`.
///
/// Only the log writes can fail this call. A slow or failing sync leaves the
/// index lagging and is reported in [`EndSessionReport::sync`].
pub async fn end_session(config: &MnemeConfig, event: SessionEnd) -> Result<EndSessionReport> {
    let data_dir = config.resolved_data_dir();
    let log = EventLog::new(&data_dir);

    let end = log.record_session_end(&event.session_id, &event.reason, event.duration_ms)?;
    let warning_id = warn_if_unsummarized(&log, &event)?;

    let timeout_secs = config.index.sync_timeout_secs;
    let sync = bounded_sync(
        data_dir,
        config.index.clone(),
        config.embedding.clone(),
        Duration::from_secs(timeout_secs),
    )
    .await;

    match &sync {
        SyncOutcome::Completed(report) => {
            tracing::info!(upserted = report.chunks_upserted, "session-end sync complete")
        }
        SyncOutcome::TimedOut { after_secs } => {
            tracing::warn!(after_secs, "session-end sync timed out, index will catch up on next sync")
        }
        SyncOutcome::Failed { error } => tracing::warn!(%error, "session-end sync failed"),
    }

    Ok(EndSessionReport {
        session_end_id: end.id,
        warning_id,
        sync,
    })
}

fn warn_if_unsummarized(log: &EventLog, event: &SessionEnd) -> Result<Option<String>> {
    if event.session_id.is_empty() || !SUMMARY_EXPECTED_REASONS.contains(&event.reason.as_str()) {
        return Ok(None);
    }
    let summarized = log
        .read_sessions()?
        .iter()
        .any(|s| s.session_id == event.session_id);
    if summarized {
        return Ok(None);
    }

    let short: String = event.session_id.chars().take(8).collect();
    let content = format!(
        "session {short}... ended without a saved summary (reason={})",
        event.reason
    );
    let warning = log.record_warning(content, &event.session_id)?;
    tracing::warn!(session_id = %event.session_id, "session ended without summary");
    Ok(Some(warning.id))
}

async fn bounded_sync(
    data_dir: PathBuf,
    index: IndexConfig,
    embedding: crate::config::EmbeddingConfig,
    limit: Duration,
) -> SyncOutcome {
    let task = tokio::task::spawn_blocking(move || -> Result<SyncReport> {
        let log = EventLog::new(&data_dir);
        let mut store = IndexStore::open(log.index_path())?;
        let provider = crate::embedding::create_provider(&embedding);
        IndexSyncer::new(&mut store, provider.as_ref(), &index).sync_all(&log, false)
    });

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(Ok(report))) => SyncOutcome::Completed(report),
        Ok(Ok(Err(e))) => SyncOutcome::Failed { error: e.to_string() },
        Ok(Err(join)) => SyncOutcome::Failed {
            error: format!("sync task aborted: {join}"),
        },
        Err(_) => SyncOutcome::TimedOut {
            after_secs: limit.as_secs(),
        },
    }
}
