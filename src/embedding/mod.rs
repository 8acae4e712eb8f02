//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait, the always-unavailable
//! [`NoEmbedding`], and a lazily loaded local ONNX model
//! ([`local::LocalEmbeddingProvider`]). Unavailability is an ordinary return
//! value: indexing and search degrade to keyword-only rather than fail.

pub mod local;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous. Callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model this provider serves.
    fn model(&self) -> &str;

    /// `true` when the model `name` is loaded and ready. May trigger the
    /// provider's one-time lazy load.
    fn loaded(&self, name: &str) -> bool;

    /// Embed a batch of texts, one vector per input, or `None` when the
    /// provider is unavailable.
    fn embed(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>>;

    fn is_available(&self) -> bool {
        self.loaded(self.model())
    }

    fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        self.embed(&[text])?.into_iter().next()
    }
}

/// A provider that never produces vectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbedding;

impl EmbeddingProvider for NoEmbedding {
    fn model(&self) -> &str {
        "none"
    }

    fn loaded(&self, _name: &str) -> bool {
        false
    }

    fn embed(&self, _texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        None
    }
}

/// Create an embedding provider from config.
///
/// `"local"` returns a provider that loads `<cache_dir>/<model>/` on first use;
/// anything else (validated to be `"none"`) disables embeddings.
pub fn create_provider(config: &crate::config::EmbeddingConfig) -> Box<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "local" => Box::new(local::LocalEmbeddingProvider::new(config)),
        _ => Box::new(NoEmbedding),
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_embedding_is_never_available() {
        let p = NoEmbedding;
        assert!(!p.is_available());
        assert!(p.embed(&["hello"]).is_none());
        assert!(p.embed_one("hello").is_none());
    }

    #[test]
    fn create_provider_honours_none() {
        let config = crate::config::EmbeddingConfig {
            provider: "none".into(),
            ..Default::default()
        };
        let p = create_provider(&config);
        assert_eq!(p.model(), "none");
        assert!(!p.is_available());
    }

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }
}
