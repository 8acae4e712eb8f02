use anyhow::Result;

use crate::config::MnemeConfig;
use crate::journal::EventLog;
use crate::memory::stats::{log_stats, LogStats};

/// Entry counts across the logs. Works without an index.
pub fn stats(config: &MnemeConfig) -> Result<LogStats> {
    let log = EventLog::new(config.resolved_data_dir());
    Ok(log_stats(&log)?)
}
