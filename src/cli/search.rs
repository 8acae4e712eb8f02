//! CLI `sync` and `search`.

use anyhow::Result;

use crate::config::MnemeConfig;
use crate::error::MemoryError;
use crate::journal::EventLog;
use crate::lock::FileLock;
use crate::memory::search::{SearchEngine, SearchMethod, SearchResponse};
use crate::memory::store::IndexStore;
use crate::memory::sync::{IndexSyncer, SyncReport};
use crate::memory::types::TimeRange;

/// Project new log lines into the index. `rebuild` drops and reprojects every
/// source while holding the management lock.
pub fn sync(config: &MnemeConfig, rebuild: bool) -> Result<SyncReport> {
    let data_dir = config.resolved_data_dir();
    let log = EventLog::new(&data_dir);
    let mut store = IndexStore::open(log.index_path())?;
    let provider = crate::embedding::create_provider(&config.embedding);
    let mut syncer = IndexSyncer::new(&mut store, provider.as_ref(), &config.index);

    let report = if rebuild {
        let mut lock = FileLock::for_data_dir(&data_dir, &config.lock);
        syncer.rebuild_all(&log, &mut lock)?
    } else {
        syncer.sync_all(&log, false)?
    };
    Ok(report)
}

pub async fn search(
    config: &MnemeConfig,
    query: &str,
    method: SearchMethod,
    max_results: Option<usize>,
    range: TimeRange,
) -> Result<SearchResponse> {
    if query.trim().is_empty() {
        return Err(MemoryError::invalid_input("query must not be empty").into());
    }
    let limit = max_results.unwrap_or(config.search.default_max_results);
    if limit == 0 {
        return Err(MemoryError::invalid_input("--max-results must be positive").into());
    }

    let log = EventLog::new(config.resolved_data_dir());
    let path = log.index_path();
    if !path.exists() {
        return Err(MemoryError::IndexNotFound { path }.into());
    }

    // Model loading and the brute-force scan both block.
    let config = config.clone();
    let query = query.to_string();
    let response = tokio::task::spawn_blocking(move || -> crate::error::Result<SearchResponse> {
        let store = IndexStore::open(&path)?;
        let provider = crate::embedding::create_provider(&config.embedding);
        SearchEngine::new(&store, &config.search)
            .with_time_range(range)
            .search(&query, method, limit, provider.as_ref())
    })
    .await??;
    Ok(response)
}
