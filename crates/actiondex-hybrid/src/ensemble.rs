//! Weighted reciprocal rank fusion of the sparse and dense rankings.
//!
//! A chunk at 0-based rank `r` in a list earns `weight / (r + 1)` from that
//! list; chunks missing from a list earn nothing from it. Only ranks matter,
//! never the raw BM25 or cosine values.
use std::collections::BTreeMap;

use tracing::debug;

use actiondex_core::config::RetrievalConfig;
use actiondex_core::error::Result;
use actiondex_core::types::{Chunk, ChunkId, SearchHit, SourceKind};

use crate::bundle::IndexBundle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleRetriever {
	pub bm25_weight: f32,
	pub vector_weight: f32,
}

impl EnsembleRetriever {
	pub fn new(bm25_weight: f32, vector_weight: f32) -> Self {
		Self { bm25_weight, vector_weight }
	}

	pub fn from_config(config: &RetrievalConfig) -> Self {
		Self::new(config.bm25_weight, config.vector_weight)
	}

	pub fn weight(&self, source: SourceKind) -> f32 {
		match source {
			SourceKind::Sparse => self.bm25_weight,
			SourceKind::Dense => self.vector_weight,
		}
	}

	/// Fused `(chunk_id, score)` pairs, best first, ties by lower id. Each
	/// hit is weighted by the index that produced it.
	pub fn fuse(&self, sparse: &[SearchHit], dense: &[SearchHit], k: usize) -> Vec<(ChunkId, f32)> {
		let mut fused: BTreeMap<ChunkId, f32> = BTreeMap::new();
		for hits in [sparse, dense] {
			let mut seen = Vec::with_capacity(hits.len());
			for (rank, hit) in hits.iter().enumerate() {
				if seen.contains(&hit.chunk_id) {
					continue;
				}
				seen.push(hit.chunk_id);
				*fused.entry(hit.chunk_id).or_insert(0.0) += self.weight(hit.source) / (rank as f32 + 1.0);
			}
		}
		let mut ranked: Vec<(ChunkId, f32)> = fused.into_iter().collect();
		ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
		ranked.truncate(k);
		ranked
	}

	/// Top `k` chunks for `expanded_query`, whose embedding is `query_vector`.
	/// Each index contributes up to `2k` candidates.
	pub fn retrieve<'b>(&self, bundle: &'b IndexBundle, expanded_query: &str, query_vector: &[f32], k: usize) -> Result<Vec<&'b Chunk>> {
		let fetch = k.saturating_mul(2);
		let sparse = bundle.sparse.search(expanded_query, fetch);
		let dense = bundle.dense.search(query_vector, fetch)?;
		let fused = self.fuse(&sparse, &dense, k);
		debug!(sparse = sparse.len(), dense = dense.len(), fused = fused.len(), "fused candidates");
		Ok(fused.into_iter().filter_map(|(id, _)| bundle.chunk(id)).collect())
	}
}
