//! Incremental projection of the event log into the index.
//!
//! The syncer reads sources and writes the store; nothing flows back. Each
//! source keeps a [`SyncCursor`]: JSON-lines sources resume after the last
//! projected entry as long as that entry's id still sits at the same position,
//! and are reprojected from scratch otherwise. The core document is re-chunked
//! whenever its mtime changes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::chunker;
use super::store::{IndexStore, META_EMBEDDING_MODEL, META_LAST_SYNC, META_TOTAL_CHUNKS};
use super::types::{Chunk, ChunkType, EntryKind, MemoryEntry, SessionSummary, SyncCursor, DEFAULT_CONFIDENCE};
use crate::config::IndexConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::journal::{self, EventLog, CORE_DOCUMENT, DAILY_DIR, SESSIONS_FILE};
use crate::lock::{hold, ConcurrencyGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `daily/YYYY-MM-DD.jsonl`: facts and warnings.
    DailyLog,
    /// `sessions.jsonl`: session summaries.
    Sessions,
    /// `MEMORY.md`: chunked markdown.
    CoreDocument,
}

/// One indexable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub kind: SourceKind,
    pub path: PathBuf,
    /// Stable identifier stored as `source_file`, relative to the data directory.
    pub key: String,
}

impl Source {
    pub fn daily(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            kind: SourceKind::DailyLog,
            key: format!("{DAILY_DIR}/{name}"),
            path,
        }
    }

    pub fn sessions(path: PathBuf) -> Self {
        Self {
            kind: SourceKind::Sessions,
            key: SESSIONS_FILE.to_string(),
            path,
        }
    }

    pub fn core_document(path: PathBuf) -> Self {
        Self {
            kind: SourceKind::CoreDocument,
            key: CORE_DOCUMENT.to_string(),
            path,
        }
    }
}

/// Bring the index in line with log files rewritten in place. Chunks of
/// `hidden` ids are dropped at once, and every rewritten source loses its
/// cursor so the next sync reprojects it from the first line.
pub fn invalidate_rewritten(
    store: &mut IndexStore,
    log: &EventLog,
    paths: &[PathBuf],
    hidden: &HashSet<String>,
) -> Result<usize> {
    let removed = store.delete_chunks(hidden.iter().map(String::as_str))?;
    let sessions = log.sessions_path();
    for path in paths {
        let source = if *path == sessions {
            Source::sessions(path.clone())
        } else {
            Source::daily(path.clone())
        };
        store.delete_sync_cursor(&source.key)?;
    }
    tracing::debug!(removed, sources = paths.len(), "index invalidated for rewritten logs");
    Ok(removed)
}

/// Every existing source under a data directory, daily logs oldest first.
pub fn discover_sources(log: &EventLog) -> Result<Vec<Source>> {
    let mut sources: Vec<Source> = log.daily_files()?.into_iter().map(Source::daily).collect();
    let sessions = log.sessions_path();
    if sessions.is_file() {
        sources.push(Source::sessions(sessions));
    }
    let core = log.core_document_path();
    if core.is_file() {
        sources.push(Source::core_document(core));
    }
    Ok(sources)
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub files_scanned: usize,
    /// Sources whose cursor no longer matched and were projected from scratch.
    pub files_reset: usize,
    pub chunks_upserted: usize,
    pub chunks_embedded: usize,
    pub chunks_removed: usize,
    pub total_chunks: usize,
    pub failures: Vec<SourceFailure>,
}

/// Outcome of projecting one source.
#[derive(Debug, Default)]
struct Projected {
    upserted: usize,
    embedded: usize,
    removed: usize,
    reset: bool,
}

pub struct IndexSyncer<'a> {
    store: &'a mut IndexStore,
    provider: &'a dyn EmbeddingProvider,
    chunk_tokens: usize,
    chunk_overlap: usize,
}

impl<'a> IndexSyncer<'a> {
    pub fn new(store: &'a mut IndexStore, provider: &'a dyn EmbeddingProvider, config: &IndexConfig) -> Self {
        Self {
            store,
            provider,
            chunk_tokens: config.chunk_tokens,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Project `sources` into the store. A source that fails is logged and
    /// reported; the others are still processed.
    pub fn sync(&mut self, sources: &[Source], rebuild: bool) -> SyncReport {
        let embed = self.provider.is_available();
        let mut report = SyncReport::default();

        for source in sources {
            report.files_scanned += 1;
            match self.sync_source(source, rebuild, embed) {
                Ok(p) => {
                    report.chunks_upserted += p.upserted;
                    report.chunks_embedded += p.embedded;
                    report.chunks_removed += p.removed;
                    report.files_reset += usize::from(p.reset);
                }
                Err(e) => {
                    tracing::warn!(source = %source.key, error = %e, "failed to sync source");
                    report.failures.push(SourceFailure {
                        source: source.key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.total_chunks = self.store.count_chunks().unwrap_or(0);
        report
    }

    /// Sync every source of `log`, drop chunks of sources that no longer
    /// exist, and stamp the store's meta.
    pub fn sync_all(&mut self, log: &EventLog, rebuild: bool) -> Result<SyncReport> {
        let sources = discover_sources(log)?;
        let removed = self.prune_vanished(&sources)?;

        let mut report = self.sync(&sources, rebuild);
        report.chunks_removed += removed;
        report.total_chunks = self.store.count_chunks()?;

        self.store.set_meta(META_LAST_SYNC, &journal::iso_now())?;
        self.store
            .set_meta(META_TOTAL_CHUNKS, &report.total_chunks.to_string())?;
        if self.provider.is_available() {
            self.store.set_meta(META_EMBEDDING_MODEL, self.provider.model())?;
        }

        tracing::info!(
            files = report.files_scanned,
            upserted = report.chunks_upserted,
            embedded = report.chunks_embedded,
            total = report.total_chunks,
            failed = report.failures.len(),
            rebuild,
            "index sync complete"
        );
        Ok(report)
    }

    /// Full rebuild under the concurrency guard: every source is dropped and
    /// reprojected.
    pub fn rebuild_all<G: ConcurrencyGuard + ?Sized>(&mut self, log: &EventLog, guard: &mut G) -> Result<SyncReport> {
        let _held = hold(guard)?;
        tracing::info!(data_dir = %log.root().display(), "rebuilding index");
        self.sync_all(log, true)
    }

    fn prune_vanished(&mut self, sources: &[Source]) -> Result<usize> {
        let live: HashSet<&str> = sources.iter().map(|s| s.key.as_str()).collect();
        let mut removed = 0;
        for cursor in self.store.list_sync_cursors()? {
            if !live.contains(cursor.source_file.as_str()) {
                removed += self.store.delete_source(&cursor.source_file)?;
                self.store.delete_sync_cursor(&cursor.source_file)?;
                tracing::info!(source = %cursor.source_file, removed, "dropped vanished source");
            }
        }
        Ok(removed)
    }

    fn sync_source(&mut self, source: &Source, rebuild: bool, embed: bool) -> Result<Projected> {
        let mut projected = Projected::default();
        if rebuild {
            projected.removed += self.store.delete_source(&source.key)?;
            self.store.delete_sync_cursor(&source.key)?;
        }

        let inner = match source.kind {
            SourceKind::DailyLog => self.sync_log::<MemoryEntry>(source, embed, daily_chunk)?,
            SourceKind::Sessions => self.sync_log::<SessionSummary>(source, embed, summary_chunk)?,
            SourceKind::CoreDocument => self.sync_document(source, embed)?,
        };
        projected.upserted += inner.upserted;
        projected.embedded += inner.embedded;
        projected.removed += inner.removed;
        projected.reset = inner.reset;
        Ok(projected)
    }

    fn sync_log<T>(
        &mut self,
        source: &Source,
        embed: bool,
        to_chunk: fn(&T, &str) -> Option<Chunk>,
    ) -> Result<Projected>
    where
        T: DeserializeOwned + Identified,
    {
        let mut projected = Projected::default();
        let mtime = file_mtime_ms(&source.path)?;
        let entries: Vec<T> = journal::read_all(&source.path)?;

        let mut start = 0;
        if let Some(cursor) = self.store.get_sync_cursor(&source.key)? {
            if cursor_matches(&cursor, &entries) {
                start = cursor.last_line;
            } else {
                tracing::info!(
                    source = %source.key,
                    last_line = cursor.last_line,
                    last_id = %cursor.last_id,
                    "log changed under cursor, reprojecting"
                );
                projected.removed += self.store.delete_source(&source.key)?;
                projected.reset = true;
            }
        }

        if start == entries.len() && !projected.reset {
            return Ok(projected);
        }

        let mut chunks: Vec<Chunk> = entries[start..]
            .iter()
            .filter_map(|e| to_chunk(e, &source.key))
            .collect();
        if embed {
            projected.embedded = self.attach_embeddings(&mut chunks);
        }

        let cursor = SyncCursor {
            source_file: source.key.clone(),
            last_line: entries.len(),
            last_id: entries.last().map(|e| e.id().to_string()).unwrap_or_default(),
            last_mtime: mtime,
        };
        self.store.commit_projection(&chunks, &cursor)?;
        projected.upserted = chunks.len();

        tracing::debug!(source = %source.key, from = start, to = entries.len(), chunks = chunks.len(), "source synced");
        Ok(projected)
    }

    fn sync_document(&mut self, source: &Source, embed: bool) -> Result<Projected> {
        let mut projected = Projected::default();
        let mtime = file_mtime_ms(&source.path)?;
        if let Some(cursor) = self.store.get_sync_cursor(&source.key)? {
            if cursor.last_mtime == mtime {
                return Ok(projected);
            }
        }

        let text = std::fs::read_to_string(&source.path)
            .map_err(|e| MemoryError::io("read", &source.path, e))?;
        projected.removed += self.store.delete_source(&source.key)?;

        let timestamp = DateTime::<Utc>::from_timestamp_millis(mtime)
            .map(journal::format_timestamp)
            .unwrap_or_default();
        let mut chunks: Vec<Chunk> = chunker::chunk(&text, self.chunk_tokens, self.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(i, content)| Chunk {
                id: format!("core-{i}"),
                content,
                chunk_type: ChunkType::Core,
                memory_type: None,
                entities: Vec::new(),
                confidence: 1.0,
                source_file: source.key.clone(),
                timestamp: timestamp.clone(),
                embedding: None,
            })
            .collect();
        if embed {
            projected.embedded = self.attach_embeddings(&mut chunks);
        }

        let cursor = SyncCursor {
            source_file: source.key.clone(),
            last_line: chunks.len(),
            last_id: String::new(),
            last_mtime: mtime,
        };
        self.store.commit_projection(&chunks, &cursor)?;
        projected.upserted = chunks.len();
        Ok(projected)
    }

    /// Best effort: on any provider failure the chunks stay keyword-only.
    fn attach_embeddings(&self, chunks: &mut [Chunk]) -> usize {
        if chunks.is_empty() {
            return 0;
        }
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        match self.provider.embed(&texts) {
            Some(vectors) if vectors.len() == chunks.len() => {
                for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                    chunk.embedding = Some(vector);
                }
                chunks.len()
            }
            Some(vectors) => {
                tracing::warn!(expected = chunks.len(), got = vectors.len(), "embedding batch size mismatch");
                0
            }
            None => 0,
        }
    }
}

/// Log records that carry an id.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for MemoryEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for SessionSummary {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The cursor still describes a prefix of `entries`.
fn cursor_matches<T: Identified>(cursor: &SyncCursor, entries: &[T]) -> bool {
    match cursor.last_line {
        0 => true,
        n if n > entries.len() => false,
        n => entries[n - 1].id() == cursor.last_id,
    }
}

fn daily_chunk(entry: &MemoryEntry, source_key: &str) -> Option<Chunk> {
    let chunk_type = match entry.kind {
        EntryKind::Fact => ChunkType::Fact,
        EntryKind::Warning => ChunkType::Warning,
        _ => return None,
    };
    if entry.is_deleted() || entry.content.trim().is_empty() {
        return None;
    }
    Some(Chunk {
        id: entry.id.clone(),
        content: entry.content.clone(),
        chunk_type,
        memory_type: entry.memory_type,
        entities: entry.entities.clone(),
        confidence: entry.confidence_or_default(),
        source_file: source_key.to_string(),
        timestamp: entry.timestamp.clone(),
        embedding: None,
    })
}

fn summary_chunk(summary: &SessionSummary, source_key: &str) -> Option<Chunk> {
    if summary.is_deleted() || summary.summary.trim().is_empty() {
        return None;
    }
    Some(Chunk {
        id: summary.id.clone(),
        content: summary.summary.clone(),
        chunk_type: ChunkType::Summary,
        memory_type: None,
        entities: Vec::new(),
        confidence: DEFAULT_CONFIDENCE,
        source_file: source_key.to_string(),
        timestamp: summary.timestamp.clone(),
        embedding: None,
    })
}

fn file_mtime_ms(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| MemoryError::io("stat", path, e))?;
    Ok(DateTime::<Utc>::from(modified).timestamp_millis())
}
