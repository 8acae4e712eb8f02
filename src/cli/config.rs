//! CLI `config show` and `config get <key>`.

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::MnemeConfig;

/// The effective configuration after file and environment overrides.
pub fn show(config: &MnemeConfig, path: &std::path::Path) -> Result<Value> {
    Ok(json!({
        "path": path.display().to_string(),
        "file_exists": path.exists(),
        "data_dir": config.resolved_data_dir().display().to_string(),
        "config": serde_json::to_value(config)?,
    }))
}

pub fn get(config: &MnemeConfig, key: &str) -> Result<Value> {
    let value = config.get(key)?;
    Ok(json!({ "key": key, "value": value }))
}
