//! Recent-facts selection for session start.
//!
//! Reads daily logs directly, never the index, so a lagging index cannot hide
//! a fact saved moments ago. Days are addressed by filename, newest first,
//! over a window of `load_days_max` calendar days (today is offset 0):
//!
//! | offset                        | kept                                   |
//! |-------------------------------|----------------------------------------|
//! | `< load_days_full`            | every fact                             |
//! | `< load_days_partial`         | the newest `partial_per_day` facts     |
//! | `< load_days_max`             | facts with `confidence >= important_confidence` |
//!
//! The survivors are sorted newest first and cut to `facts_limit`.

use chrono::{Days, NaiveDate};

use super::types::{MemoryEntry, MemoryType};
use crate::config::RecallConfig;
use crate::error::Result;
use crate::journal::EventLog;

pub struct RecencySelector<'a> {
    log: &'a EventLog,
    policy: &'a RecallConfig,
}

impl<'a> RecencySelector<'a> {
    pub fn new(log: &'a EventLog, policy: &'a RecallConfig) -> Self {
        Self { log, policy }
    }

    /// Recent facts as of `today`, newest first.
    pub fn select(&self, today: NaiveDate) -> Result<Vec<MemoryEntry>> {
        let mut days = Vec::with_capacity(self.policy.load_days_max as usize);
        for offset in 0..self.policy.load_days_max {
            let Some(day) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            let facts: Vec<MemoryEntry> = self
                .log
                .read_day(day)?
                .into_iter()
                .filter(is_context_fact)
                .collect();
            days.push((offset, facts));
        }
        Ok(apply_decay(days, self.policy))
    }
}

/// Facts eligible for pre-session context: live facts with content, other
/// than running session summaries.
fn is_context_fact(entry: &MemoryEntry) -> bool {
    entry.is_fact()
        && !entry.is_deleted()
        && entry.memory_type != Some(MemoryType::S)
        && !entry.content.trim().is_empty()
}

/// Apply the decay tiers to facts grouped by day offset (each group in file
/// order) and return at most `facts_limit` entries, newest first.
pub fn apply_decay(days: Vec<(u32, Vec<MemoryEntry>)>, policy: &RecallConfig) -> Vec<MemoryEntry> {
    let mut selected = Vec::new();

    for (offset, mut facts) in days {
        if offset >= policy.load_days_max {
            continue;
        }
        // Newest first within the day; equal timestamps keep later lines first.
        facts.reverse();
        facts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if offset < policy.load_days_full {
            selected.extend(facts);
        } else if offset < policy.load_days_partial {
            selected.extend(facts.into_iter().take(policy.partial_per_day));
        } else {
            selected.extend(
                facts
                    .into_iter()
                    .filter(|f| f.confidence_or_default() >= policy.important_confidence),
            );
        }
    }

    selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    selected.truncate(policy.facts_limit);
    selected
}

/// One context line per fact: `- [W][2026-03-01] content`.
pub fn format_fact_line(entry: &MemoryEntry) -> String {
    let mtype = entry.memory_type.map_or("?", |m| m.as_str());
    format!("- [{mtype}][{}] {}", entry.day(), entry.content)
}
