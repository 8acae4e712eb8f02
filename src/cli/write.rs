//! CLI `save-fact` and `save-summary`.

use anyhow::Result;

use crate::config::MnemeConfig;
use crate::journal::{EventLog, NewFact, NewSummary, SummaryOutcome};
use crate::memory::types::{MemoryEntry, MemoryType};

pub fn save_fact(
    config: &MnemeConfig,
    content: String,
    memory_type: MemoryType,
    entities: Vec<String>,
    confidence: f64,
    session: Option<String>,
) -> Result<MemoryEntry> {
    let log = EventLog::new(config.resolved_data_dir());
    let entry = log.save_fact(NewFact {
        content,
        memory_type,
        entities: normalize_entities(entities),
        confidence,
        session,
    })?;
    Ok(entry)
}

pub fn save_summary(config: &MnemeConfig, summary: NewSummary) -> Result<SummaryOutcome> {
    let log = EventLog::new(config.resolved_data_dir());
    Ok(log.save_summary(summary)?)
}

/// Accept both repeated flags and comma-separated lists; drop blanks and
/// repeats while keeping first-seen order.
fn normalize_entities(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in raw.iter().flat_map(|s| s.split(',')) {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
