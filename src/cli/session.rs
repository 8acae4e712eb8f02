//! CLI `context` and `end-session`: the two ends of a session's lifecycle.

use anyhow::Result;
use serde::Serialize;

use crate::config::MnemeConfig;
use crate::journal::EventLog;
use crate::memory::context::{end_session as run_end_session, load_context, EndSessionReport, SessionContext, SessionEnd};

#[derive(Debug, Serialize)]
pub struct ContextOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_start_id: Option<String>,
    pub text: String,
    #[serde(flatten)]
    pub context: SessionContext,
}

/// Build session-start context. With a session id the start is also recorded.
pub fn context(config: &MnemeConfig, session: Option<&str>, workspace: Option<&str>) -> Result<ContextOutput> {
    let log = EventLog::new(config.resolved_data_dir());
    let session_start_id = match session {
        Some(id) if !id.is_empty() => Some(log.record_session_start(id, workspace)?.id),
        _ => None,
    };
    let context = load_context(&log, &config.recall, crate::journal::today())?;
    Ok(ContextOutput {
        session_start_id,
        text: context.render(),
        context,
    })
}

pub async fn end_session(
    config: &MnemeConfig,
    session_id: String,
    reason: String,
    duration_ms: Option<u64>,
) -> Result<EndSessionReport> {
    let report = run_end_session(
        config,
        SessionEnd {
            session_id,
            reason,
            duration_ms,
        },
    )
    .await?;
    Ok(report)
}
