#![allow(dead_code)]

use std::path::Path;

use mneme::config::MnemeConfig;
use mneme::embedding::{l2_normalize, EmbeddingProvider};
use mneme::journal::{EventLog, NewFact};
use mneme::memory::types::{MemoryEntry, MemoryType};
use tempfile::TempDir;

/// A throwaway data directory with embeddings disabled and a short lock timeout.
pub struct TestDir {
    pub tmp: TempDir,
    pub log: EventLog,
    pub config: MnemeConfig,
}

impl TestDir {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let log = EventLog::new(tmp.path());
        Self { tmp, log, config }
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }
}

pub fn test_config(data_dir: &Path) -> MnemeConfig {
    let mut config = MnemeConfig::default();
    config.storage.data_dir = data_dir.to_string_lossy().into_owned();
    config.embedding.provider = "none".into();
    config.lock.timeout_secs = 0.3;
    config.lock.poll_interval_ms = 20;
    config
}

/// Append a `W` fact with the given entity tags.
pub fn save_fact(log: &EventLog, content: &str, entities: &[&str]) -> MemoryEntry {
    log.save_fact(NewFact {
        content: content.into(),
        memory_type: MemoryType::W,
        entities: entities.iter().map(|e| e.to_string()).collect(),
        confidence: 0.8,
        session: None,
    })
    .unwrap()
}

const SPIKE_DIM: usize = 64;

/// Deterministic bag-of-words embedder: every lowercase word lights up one of
/// 64 dimensions. Texts sharing words get positive cosine similarity; texts
/// with disjoint vocabularies are usually orthogonal.
#[derive(Debug, Default)]
pub struct SpikeEmbedding;

impl SpikeEmbedding {
    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; SPIKE_DIM];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % SPIKE_DIM] += 1.0;
        }
        l2_normalize(&v)
    }
}

impl EmbeddingProvider for SpikeEmbedding {
    fn model(&self) -> &str {
        "spike-test"
    }

    fn loaded(&self, name: &str) -> bool {
        name == "spike-test"
    }

    fn embed(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        Some(texts.iter().map(|t| Self::vector(t)).collect())
    }
}
