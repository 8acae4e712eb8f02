//! Local ONNX Runtime embedding provider.
//!
//! Loads a sentence-transformers export (`model.onnx` + `tokenizer.json`) from
//! `<cache_dir>/<model>/` the first time it is needed. A failed load is logged
//! once and the provider then reports itself unavailable for the rest of the
//! process. Handles tokenization, inference, mean pooling and L2 normalization.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use ndarray::{ArrayView1, ArrayView3, Axis};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Maximum sequence length for MiniLM-style encoders (trained at 256).
const MAX_SEQ_LEN: usize = 256;

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for LoadedModel {}
unsafe impl Sync for LoadedModel {}

pub struct LocalEmbeddingProvider {
    model: String,
    model_dir: PathBuf,
    state: OnceLock<Option<LoadedModel>>,
}

impl LocalEmbeddingProvider {
    /// Cheap: nothing is read from disk until the first embedding request.
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: config.model.clone(),
            model_dir: model_dir(config),
            state: OnceLock::new(),
        }
    }

    fn get(&self) -> Option<&LoadedModel> {
        self.state
            .get_or_init(|| match load(&self.model_dir) {
                Ok(loaded) => {
                    tracing::info!(model = %self.model, dir = %self.model_dir.display(), "embedding model loaded");
                    Some(loaded)
                }
                Err(e) => {
                    tracing::warn!(
                        model = %self.model,
                        error = %format!("{e:#}"),
                        "embedding model unavailable, falling back to keyword-only"
                    );
                    None
                }
            })
            .as_ref()
    }
}

/// Directory holding the files for the configured model.
pub fn model_dir(config: &EmbeddingConfig) -> PathBuf {
    crate::config::expand_tilde(&config.cache_dir).join(&config.model)
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn loaded(&self, name: &str) -> bool {
        name == self.model && self.get().is_some()
    }

    fn embed(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }
        let loaded = self.get()?;
        match run_batch(loaded, texts) {
            Ok(vectors) => Some(vectors),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), batch = texts.len(), "embedding failed");
                None
            }
        }
    }
}

fn load(dir: &Path) -> Result<LoadedModel> {
    let model_path = dir.join(MODEL_FILE);
    let tokenizer_path = dir.join(TOKENIZER_FILE);

    anyhow::ensure!(
        model_path.exists(),
        "ONNX model not found at {}. Run `mneme model download` first.",
        model_path.display()
    );
    anyhow::ensure!(
        tokenizer_path.exists(),
        "Tokenizer not found at {}. Run `mneme model download` first.",
        tokenizer_path.display()
    );

    let session = Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)
        .context("failed to load ONNX model")?;

    let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

    tokenizer
        .with_truncation(Some(tokenizers::TruncationParams {
            max_length: MAX_SEQ_LEN,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

    tokenizer.with_padding(Some(tokenizers::PaddingParams {
        strategy: tokenizers::PaddingStrategy::BatchLongest,
        ..Default::default()
    }));

    Ok(LoadedModel {
        session: Mutex::new(session),
        tokenizer,
    })
}

fn run_batch(model: &LoadedModel, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
    // Step 1: Tokenize
    let encodings = model
        .tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

    let batch_size = encodings.len();
    let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

    // Step 2: Build flat input tensors as i64
    let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
    let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

    for encoding in &encodings {
        input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
        attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
    }

    let shape = vec![batch_size as i64, seq_len as i64];
    let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
    let attention_mask_tensor =
        Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))?;
    // token_type_ids: all zeros (single sentence, no segment B)
    let token_type_ids = vec![0i64; batch_size * seq_len];
    let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;

    // Step 3: Run ONNX inference
    let mut session = model
        .session
        .lock()
        .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

    let outputs = session.run(ort::inputs! {
        "input_ids" => input_ids_tensor,
        "attention_mask" => attention_mask_tensor,
        "token_type_ids" => token_type_ids_tensor,
    })?;

    // Step 4: Token embeddings, [batch, seq_len, hidden]. The output name
    // varies by export; fall back to the first output.
    let token_emb_value = outputs
        .get("token_embeddings")
        .or_else(|| outputs.get("last_hidden_state"))
        .unwrap_or_else(|| &outputs[0]);

    let (shape, data) = token_emb_value
        .try_extract_tensor::<f32>()
        .context("failed to extract token_embeddings tensor")?;

    let dims: &[i64] = &shape;
    anyhow::ensure!(
        dims.len() == 3 && dims[0] as usize == batch_size && dims[1] as usize == seq_len,
        "unexpected token_embeddings shape: {dims:?}, expected [{batch_size}, {seq_len}, hidden]"
    );
    let hidden =
        ArrayView3::from_shape((batch_size, seq_len, dims[2] as usize), data).context("bad output layout")?;

    // Step 5: Mean pooling over unmasked tokens, then L2 normalize
    let mask: Vec<f32> = attention_mask_flat.iter().map(|&m| m as f32).collect();
    let mut results = Vec::with_capacity(batch_size);
    for (b, tokens) in hidden.axis_iter(Axis(0)).enumerate() {
        let row_mask = ArrayView1::from(&mask[b * seq_len..(b + 1) * seq_len]);
        let count = row_mask.sum();
        let summed = tokens.t().dot(&row_mask);
        let pooled = if count > 0.0 { summed / count } else { summed };
        results.push(l2_normalize(&pooled.to_vec()));
    }

    Ok(results)
}
