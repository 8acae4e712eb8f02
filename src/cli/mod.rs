pub mod config;
pub mod doctor;
pub mod inspect;
pub mod manage;
pub mod search;
pub mod session;
pub mod stats;
pub mod write;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::config::EmbeddingConfig;
use crate::embedding::local::{model_dir, MODEL_FILE, TOKENIZER_FILE};
use crate::error::{MemoryError, EXIT_OPERATIONAL};

/// Code reported for failures that are not a [`MemoryError`].
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

const HF_BASE: &str = "https://huggingface.co/sentence-transformers";

/// Print a success envelope: `{"status":"ok","command":..,"data":..}`.
pub fn emit_ok<T: Serialize>(command: &str, data: &T) -> Result<()> {
    let envelope = json!({
        "status": "ok",
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// Print an error envelope and return the process exit code for it.
pub fn emit_error(command: &str, err: &anyhow::Error) -> u8 {
    let (code, exit) = match err.downcast_ref::<MemoryError>() {
        Some(e) => (e.code(), e.exit_code()),
        None => (INTERNAL_ERROR, EXIT_OPERATIONAL),
    };
    let envelope = json!({
        "status": "error",
        "command": command,
        "error": {
            "code": code,
            "message": format!("{err:#}"),
        },
    });
    println!("{envelope}");
    exit
}

#[derive(Debug, Serialize)]
pub struct DownloadReport {
    pub model: String,
    pub dir: String,
    pub downloaded: Vec<String>,
    pub already_present: Vec<String>,
}

/// Download the ONNX embedding model and tokenizer into `<cache_dir>/<model>/`.
pub async fn model_download(config: &EmbeddingConfig) -> Result<DownloadReport> {
    let dir = model_dir(config);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create model dir: {}", dir.display()))?;

    let mut report = DownloadReport {
        model: config.model.clone(),
        dir: dir.display().to_string(),
        downloaded: Vec::new(),
        already_present: Vec::new(),
    };

    let files = [
        (MODEL_FILE, format!("{HF_BASE}/{}/resolve/main/onnx/model.onnx", config.model)),
        (TOKENIZER_FILE, format!("{HF_BASE}/{}/resolve/main/tokenizer.json", config.model)),
    ];
    for (name, url) in files {
        let dest = dir.join(name);
        if dest.exists() {
            report.already_present.push(name.to_string());
            continue;
        }
        eprintln!("Downloading {name}...");
        download_file(&url, &dest).await?;
        tracing::info!(file = name, dest = %dest.display(), "downloaded");
        report.downloaded.push(name.to_string());
    }

    Ok(report)
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download of {url} failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .context("invalid progress template")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
