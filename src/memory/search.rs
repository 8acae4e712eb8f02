//! Read path: keyword (BM25), vector (brute-force cosine) and hybrid (RRF).
//!
//! Every result carries a `score` where higher is better. For keyword hits it
//! is the negated `bm25()` value, for vector hits the cosine similarity, for
//! hybrid hits the fused reciprocal-rank score.

use serde::Serialize;
use std::collections::HashMap;

use super::store::IndexStore;
use super::types::{Chunk, ChunkType, MemoryType, TimeRange};
use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Keyword,
    Vector,
    Hybrid,
}

impl std::str::FromStr for SearchMethod {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "vector" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(MemoryError::invalid_input(format!(
                "unknown search method: {s} (expected hybrid, keyword or vector)"
            ))),
        }
    }
}

/// A single ranked chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    pub entities: Vec<String>,
    pub confidence: f64,
    pub source_file: String,
    pub timestamp: String,
    pub score: f64,
}

impl SearchHit {
    fn from_chunk(chunk: Chunk, score: f64) -> Self {
        Self {
            id: chunk.id,
            content: chunk.content,
            chunk_type: chunk.chunk_type,
            memory_type: chunk.memory_type,
            entities: chunk.entities,
            confidence: chunk.confidence,
            source_file: chunk.source_file,
            timestamp: chunk.timestamp,
            score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub requested: SearchMethod,
    /// The method that actually produced `results`. Differs from `requested`
    /// when no query embedding was available.
    pub method: SearchMethod,
    #[serde(skip_serializing_if = "TimeRange::is_unbounded")]
    pub time_range: TimeRange,
    pub count: usize,
    pub results: Vec<SearchHit>,
}

// ── Public API ────────────────────────────────────────────────────────────────

pub struct SearchEngine<'a> {
    store: &'a IndexStore,
    rrf_k: usize,
    range: TimeRange,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a IndexStore, config: &SearchConfig) -> Self {
        Self {
            store,
            rrf_k: config.rrf_k,
            range: TimeRange::all(),
        }
    }

    /// Restrict every search method to chunks timestamped inside `range`.
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    /// BM25-ranked matches, best first. Any query failure yields no results.
    pub fn search_keyword(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        match self.store.search_keyword(query, limit, &self.range) {
            Ok(rows) => rows
                .into_iter()
                .map(|(chunk, bm25)| SearchHit::from_chunk(chunk, -bm25))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, query, "keyword search failed, returning no results");
                Vec::new()
            }
        }
    }

    /// Cosine similarity against every stored embedding, most similar first.
    pub fn search_vector(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let mut scored: Vec<(Chunk, f32)> = self
            .store
            .all_chunks_with_embedding(&self.range)?
            .into_iter()
            .map(|chunk| {
                let sim = chunk
                    .embedding
                    .as_deref()
                    .map_or(0.0, |e| cosine_similarity(query_embedding, e));
                (chunk, sim)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored
            .into_iter()
            .map(|(mut chunk, sim)| {
                chunk.embedding = None;
                SearchHit::from_chunk(chunk, f64::from(sim))
            })
            .collect())
    }

    /// Keyword and (given an embedding) vector search over `2 * limit`
    /// candidates each, fused with Reciprocal Rank Fusion.
    ///
    /// Returns the method that produced the results: without an embedding this
    /// is plain keyword search, reported as such.
    pub fn search_hybrid(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Result<(Vec<SearchHit>, SearchMethod)> {
        let Some(embedding) = query_embedding else {
            return Ok((self.search_keyword(query, limit), SearchMethod::Keyword));
        };

        let candidates = limit.saturating_mul(2);
        let keyword = self.search_keyword(query, candidates);
        let vector = self.search_vector(embedding, candidates)?;

        let keyword_ids: Vec<&str> = keyword.iter().map(|h| h.id.as_str()).collect();
        let vector_ids: Vec<&str> = vector.iter().map(|h| h.id.as_str()).collect();
        let fused = rrf_fuse(&[&keyword_ids, &vector_ids], self.rrf_k);

        let mut by_id: HashMap<String, SearchHit> = HashMap::new();
        for hit in keyword.into_iter().chain(vector) {
            by_id.entry(hit.id.clone()).or_insert(hit);
        }

        let results = fused
            .into_iter()
            .take(limit)
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|mut hit| {
                    hit.score = score;
                    hit
                })
            })
            .collect();
        Ok((results, SearchMethod::Hybrid))
    }

    /// Run `method`, embedding the query through `provider` when needed.
    /// Vector and hybrid requests fall back to keyword search when no query
    /// embedding can be produced.
    pub fn search(
        &self,
        query: &str,
        method: SearchMethod,
        limit: usize,
        provider: &dyn EmbeddingProvider,
    ) -> Result<SearchResponse> {
        let embedding = match method {
            SearchMethod::Keyword => None,
            SearchMethod::Vector | SearchMethod::Hybrid => provider.embed_one(query),
        };

        let (results, used) = match (method, embedding.as_deref()) {
            (SearchMethod::Vector, Some(e)) => (self.search_vector(e, limit)?, SearchMethod::Vector),
            (SearchMethod::Hybrid, e) => self.search_hybrid(query, e, limit)?,
            _ => (self.search_keyword(query, limit), SearchMethod::Keyword),
        };
        if used != method {
            tracing::info!(requested = ?method, "no query embedding available, using keyword search");
        }

        Ok(SearchResponse {
            query: query.to_string(),
            requested: method,
            method: used,
            time_range: self.range.clone(),
            count: results.len(),
            results,
        })
    }
}

/// `dot(a, b) / (|a| * |b|)`, or 0.0 when either norm is zero or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Reciprocal Rank Fusion.
///
/// Each id scores `sum(1 / (k + rank))` over the lists it appears in, with
/// 1-based ranks. Sorted by score descending; ties keep first-seen order.
pub fn rrf_fuse(lists: &[&[&str]], k: usize) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in lists {
        for (i, id) in list.iter().enumerate() {
            let rank = (i + 1) as f64;
            let score = scores.entry((*id).to_string()).or_insert_with(|| {
                order.push((*id).to_string());
                0.0
            });
            *score += 1.0 / (k as f64 + rank);
        }
    }

    let mut merged: Vec<(String, f64)> = order
        .into_iter()
        .map(|id| {
            let score = scores[&id];
            (id, score)
        })
        .collect();
    merged.sort_by(|a, b| b.1.total_cmp(&a.1));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NoEmbedding;

    fn chunk(id: &str, content: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: id.into(),
            content: content.into(),
            chunk_type: ChunkType::Fact,
            memory_type: Some(MemoryType::W),
            entities: vec![],
            confidence: 0.8,
            source_file: "daily/2026-03-01.jsonl".into(),
            timestamp: "2026-03-01T10:00:00Z".into(),
            embedding,
        }
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 8];
        v[i] = 1.0;
        v
    }

    #[test]
    fn cosine_identities() {
        let a = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, -2.0, -3.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn rrf_single_list_is_one_term() {
        let fused = rrf_fuse(&[&["a", "b"], &[]], 60);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].1 - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn rrf_presence_in_both_lists_wins() {
        // "both" is rank 2 in each list; "kw" and "vec" are rank 1 in one list only.
        let fused = rrf_fuse(&[&["kw", "both"], &["vec", "both"]], 60);
        assert_eq!(fused[0].0, "both");
        assert!((fused[0].1 - 2.0 / 62.0).abs() < 1e-12);

        // At equal individual rank, two terms beat one.
        let fused = rrf_fuse(&[&["x", "y"], &["x"]], 60);
        assert_eq!(fused[0].0, "x");
        assert!(fused[0].1 > fused[1].1);
    }

    #[test]
    fn rrf_k_flattens() {
        let steep = rrf_fuse(&[&["a", "b"]], 1);
        let flat = rrf_fuse(&[&["a", "b"]], 1000);
        assert!(steep[0].1 / steep[1].1 > flat[0].1 / flat[1].1);
    }

    #[test]
    fn keyword_search_swallows_errors() {
        let store = IndexStore::open_in_memory().unwrap();
        store.connection().execute_batch("DROP TABLE chunks_fts").unwrap();
        let engine = SearchEngine::new(&store, &SearchConfig::default());
        assert!(engine.search_keyword("anything", 10).is_empty());
    }

    #[test]
    fn vector_search_orders_by_similarity() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert_chunk(&chunk("near", "n", Some(vec![1.0, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))).unwrap();
        store.upsert_chunk(&chunk("far", "f", Some(axis(3)))).unwrap();
        store.upsert_chunk(&chunk("none", "no vector", None)).unwrap();

        let engine = SearchEngine::new(&store, &SearchConfig::default());
        let hits = engine.search_vector(&axis(0), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn hybrid_fuses_both_lists() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert_chunk(&chunk("both", "tokio runtime notes", Some(axis(0)))).unwrap();
        store.upsert_chunk(&chunk("kw", "tokio only in text", Some(axis(5)))).unwrap();
        store.upsert_chunk(&chunk("vec", "unrelated words", Some(axis(0)))).unwrap();

        let engine = SearchEngine::new(&store, &SearchConfig::default());
        let (hits, method) = engine.search_hybrid("tokio", Some(&axis(0)), 10).unwrap();
        assert_eq!(method, SearchMethod::Hybrid);
        assert_eq!(hits[0].id, "both");
        assert!(hits.iter().any(|h| h.id == "vec"));
        assert!(hits.iter().any(|h| h.id == "kw"));
    }

    #[test]
    fn hybrid_without_embedding_reports_keyword() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert_chunk(&chunk("a", "tokio", None)).unwrap();
        let engine = SearchEngine::new(&store, &SearchConfig::default());

        let resp = engine.search("tokio", SearchMethod::Hybrid, 5, &NoEmbedding).unwrap();
        assert_eq!(resp.requested, SearchMethod::Hybrid);
        assert_eq!(resp.method, SearchMethod::Keyword);
        assert_eq!(resp.count, 1);

        let resp = engine.search("tokio", SearchMethod::Vector, 5, &NoEmbedding).unwrap();
        assert_eq!(resp.method, SearchMethod::Keyword);
    }

    #[test]
    fn time_range_applies_to_every_method() {
        let store = IndexStore::open_in_memory().unwrap();
        let mut old = chunk("old", "tokio notes", Some(axis(0)));
        old.timestamp = "2026-01-15T09:00:00Z".into();
        store.upsert_chunk(&old).unwrap();
        store.upsert_chunk(&chunk("new", "tokio notes", Some(axis(0)))).unwrap();

        let range = TimeRange::from_args(
            None,
            Some("2026-02-01"),
            None,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
        )
        .unwrap();
        let engine = SearchEngine::new(&store, &SearchConfig::default()).with_time_range(range.clone());

        let only_new = |hits: Vec<SearchHit>| hits.iter().map(|h| h.id.clone()).collect::<Vec<_>>() == ["new"];
        assert!(only_new(engine.search_keyword("tokio", 10)));
        assert!(only_new(engine.search_vector(&axis(0), 10).unwrap()));
        assert!(only_new(engine.search_hybrid("tokio", Some(&axis(0)), 10).unwrap().0));

        let resp = engine.search("tokio", SearchMethod::Keyword, 10, &NoEmbedding).unwrap();
        assert_eq!(resp.time_range, range);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["time_range"]["from"], "2026-02-01T00:00:00Z");

        let unbounded = SearchEngine::new(&store, &SearchConfig::default())
            .search("tokio", SearchMethod::Keyword, 10, &NoEmbedding)
            .unwrap();
        assert_eq!(unbounded.count, 2);
        assert!(serde_json::to_value(&unbounded).unwrap().get("time_range").is_none());
    }

    #[test]
    fn method_parse() {
        assert_eq!("hybrid".parse::<SearchMethod>().unwrap(), SearchMethod::Hybrid);
        assert_eq!(
            "fuzzy".parse::<SearchMethod>().unwrap_err().code(),
            crate::error::INVALID_INPUT
        );
    }
}
