//! Core record definitions.
//!
//! [`MemoryEntry`] and [`SessionSummary`] are the authoritative, append-only
//! log records. [`Chunk`] and [`SyncCursor`] belong to the derived index and can
//! always be rebuilt from the logs.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Field set on a log record that has been soft-deleted.
pub const DELETED_AT: &str = "deleted_at";

/// Classification of a stored fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    /// World: objective facts.
    W,
    /// Biographical: project history, things that happened.
    B,
    /// Opinion: preferences and judgements.
    O,
    /// Running session summary written mid-session. Never injected as a recent fact.
    S,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::W => "W",
            Self::B => "B",
            Self::O => "O",
            Self::S => "S",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "W" => Ok(Self::W),
            "B" => Ok(Self::B),
            "O" => Ok(Self::O),
            "S" => Ok(Self::S),
            _ => Err(format!("unknown memory type: {s} (expected W, B, O or S)")),
        }
    }
}

/// The `type` field of a daily log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Fact,
    SessionStart,
    SessionEnd,
    Audit,
    Warning,
    /// Anything written by a newer or foreign writer.
    #[serde(other)]
    Other,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Audit => "audit",
            Self::Warning => "warning",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// One line of a daily log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// `YYYY-MM-DDTHH:MM:SSZ`
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EntrySource>,
    /// Lifecycle payload (`session_id`, `reason`, `workspace`, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Confidence assumed for facts that do not record one.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

impl MemoryEntry {
    pub fn is_fact(&self) -> bool {
        self.kind == EntryKind::Fact
    }

    pub fn confidence_or_default(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// `YYYY-MM-DD` prefix of the timestamp.
    pub fn day(&self) -> &str {
        self.timestamp.get(..10).unwrap_or(&self.timestamp)
    }

    pub fn is_deleted(&self) -> bool {
        self.extra.contains_key(DELETED_AT)
    }
}

/// One completed session. Only the newest record is read back at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub todos: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionSummary {
    pub fn is_deleted(&self) -> bool {
        self.extra.contains_key(DELETED_AT)
    }
}

/// What a chunk was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Fact,
    Summary,
    Warning,
    /// A section of the curated core document.
    Core,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Summary => "summary",
            Self::Warning => "warning",
            Self::Core => "core",
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "summary" => Ok(Self::Summary),
            "warning" => Ok(Self::Warning),
            "core" => Ok(Self::Core),
            _ => Err(format!("unknown chunk type: {s}")),
        }
    }
}

/// Index-side projection of a log entry or document section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Stable key derived from the source; re-upserting it replaces the row.
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub memory_type: Option<MemoryType>,
    pub entities: Vec<String>,
    pub confidence: f64,
    pub source_file: String,
    pub timestamp: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// Per-source bookmark of how much of a log is already in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncCursor {
    pub source_file: String,
    /// Number of parsed entries already projected.
    pub last_line: usize,
    /// Id of the entry at `last_line - 1`; empty for documents.
    pub last_id: String,
    /// Source modification time in milliseconds since the epoch.
    pub last_mtime: i64,
}

/// Inclusive bounds on chunk timestamps. Both ends are full
/// `YYYY-MM-DDTHH:MM:SSZ` strings, which order lexically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl TimeRange {
    /// No bounds.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build bounds from the search flags.
    ///
    /// `days` covers `today` and the `days - 1` days before it. `from` and `to`
    /// are `YYYY-MM-DD` and include the whole day. When both `days` and `from`
    /// are given the later start wins.
    pub fn from_args(
        days: Option<u32>,
        from: Option<&str>,
        to: Option<&str>,
        today: NaiveDate,
    ) -> crate::error::Result<Self> {
        let mut start = from.map(|d| parse_day("--from", d)).transpose()?;
        if let Some(days) = days {
            if days == 0 {
                return Err(MemoryError::invalid_input("--days must be positive"));
            }
            let first = today
                .checked_sub_days(Days::new(u64::from(days - 1)))
                .unwrap_or(NaiveDate::MIN);
            start = Some(start.map_or(first, |s| s.max(first)));
        }
        let end = to.map(|d| parse_day("--to", d)).transpose()?;

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(MemoryError::invalid_input(format!(
                    "empty time range: {s} is after {e}"
                )));
            }
        }

        Ok(Self {
            from: start.map(|d| format!("{}T00:00:00Z", d.format("%Y-%m-%d"))),
            to: end.map(|d| format!("{}T23:59:59Z", d.format("%Y-%m-%d"))),
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, timestamp: &str) -> bool {
        self.from.as_deref().map_or(true, |f| timestamp >= f)
            && self.to.as_deref().map_or(true, |t| timestamp <= t)
    }
}

fn parse_day(flag: &str, value: &str) -> crate::error::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| MemoryError::invalid_input(format!("{flag} expects YYYY-MM-DD, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_round_trips_with_optional_source() {
        let line = r#"{"id":"log-1","type":"fact","memory_type":"O","content":"prefers tabs","entities":["editor"],"confidence":0.9,"timestamp":"2026-03-01T10:00:00Z","source":{"session":"conv-7"}}"#;
        let entry: MemoryEntry = serde_json::from_str(line).unwrap();
        assert!(entry.is_fact());
        assert_eq!(entry.memory_type, Some(MemoryType::O));
        assert_eq!(entry.day(), "2026-03-01");
        assert_eq!(entry.source.as_ref().and_then(|s| s.session.as_deref()), Some("conv-7"));
        assert!(entry.extra.is_empty());
    }

    #[test]
    fn lifecycle_fields_are_preserved() {
        let line = r#"{"id":"log-2","type":"session_end","reason":"completed","session_id":"c1","timestamp":"2026-03-01T10:00:00Z"}"#;
        let entry: MemoryEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.kind, EntryKind::SessionEnd);
        assert_eq!(entry.extra["reason"], "completed");
        let back = serde_json::to_string(&entry).unwrap();
        assert!(back.contains("\"reason\":\"completed\""));
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let entry: MemoryEntry =
            serde_json::from_str(r#"{"id":"x","type":"heartbeat","timestamp":""}"#).unwrap();
        assert_eq!(entry.kind, EntryKind::Other);
    }

    #[test]
    fn memory_type_parse() {
        assert_eq!("B".parse::<MemoryType>().unwrap(), MemoryType::B);
        assert!("x".parse::<MemoryType>().is_err());
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn time_range_from_days_includes_today() {
        let range = TimeRange::from_args(Some(3), None, None, day("2026-03-10")).unwrap();
        assert_eq!(range.from.as_deref(), Some("2026-03-08T00:00:00Z"));
        assert_eq!(range.to, None);
        assert!(range.contains("2026-03-08T00:00:00Z"));
        assert!(!range.contains("2026-03-07T23:59:59Z"));
    }

    #[test]
    fn time_range_bounds_cover_whole_days() {
        let range =
            TimeRange::from_args(None, Some("2026-03-01"), Some("2026-03-02"), day("2026-03-10")).unwrap();
        assert!(range.contains("2026-03-01T00:00:00Z"));
        assert!(range.contains("2026-03-02T23:59:59Z"));
        assert!(!range.contains("2026-03-03T00:00:00Z"));
        assert!(TimeRange::all().is_unbounded());
    }

    #[test]
    fn time_range_days_and_from_keep_later_start() {
        let range =
            TimeRange::from_args(Some(2), Some("2026-01-01"), None, day("2026-03-10")).unwrap();
        assert_eq!(range.from.as_deref(), Some("2026-03-09T00:00:00Z"));
    }

    #[test]
    fn time_range_rejects_bad_input() {
        let today = day("2026-03-10");
        for result in [
            TimeRange::from_args(Some(0), None, None, today),
            TimeRange::from_args(None, Some("03/01/2026"), None, today),
            TimeRange::from_args(None, None, Some("2026-13-01"), today),
            TimeRange::from_args(None, Some("2026-03-05"), Some("2026-03-01"), today),
        ] {
            assert_eq!(result.unwrap_err().code(), crate::error::INVALID_INPUT);
        }
    }

    #[test]
    fn deleted_marker_is_read_from_extra() {
        let live: MemoryEntry =
            serde_json::from_str(r#"{"id":"a","type":"fact","timestamp":""}"#).unwrap();
        let gone: MemoryEntry = serde_json::from_str(
            r#"{"id":"b","type":"fact","timestamp":"","deleted_at":"2026-03-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(!live.is_deleted());
        assert!(gone.is_deleted());
    }
}
