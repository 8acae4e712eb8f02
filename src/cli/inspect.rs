//! CLI `db` subcommands. Every one of them opens the index read-only and
//! fails with `DB_NOT_FOUND` when it has not been built yet.

use anyhow::Result;
use rusqlite::Connection;

use crate::config::MnemeConfig;
use crate::db::inspect::{self, ColumnInfo, IndexStats, QueryResult, TableDump, TableInfo};
use crate::journal::EventLog;

/// Hard cap on `db show --limit`.
pub const MAX_SHOW_LIMIT: usize = 1000;

fn open(config: &MnemeConfig) -> Result<Connection> {
    let log = EventLog::new(config.resolved_data_dir());
    Ok(crate::db::open_index_readonly(log.index_path())?)
}

pub fn tables(config: &MnemeConfig) -> Result<Vec<TableInfo>> {
    Ok(inspect::list_tables(&open(config)?)?)
}

pub fn schema(config: &MnemeConfig, table: &str) -> Result<Vec<ColumnInfo>> {
    Ok(inspect::describe_table(&open(config)?, table)?)
}

pub fn show(config: &MnemeConfig, table: &str, limit: usize, offset: usize) -> Result<TableDump> {
    let limit = limit.clamp(1, MAX_SHOW_LIMIT);
    Ok(inspect::dump_rows(&open(config)?, table, limit, offset)?)
}

pub fn query(config: &MnemeConfig, sql: &str) -> Result<QueryResult> {
    Ok(inspect::query_readonly(&open(config)?, sql)?)
}

pub fn stats(config: &MnemeConfig) -> Result<IndexStats> {
    Ok(inspect::index_stats(&open(config)?)?)
}
