use tracing::debug;

use actiondex_core::error::{Error, Result};
use actiondex_core::types::{Chunk, ChunkId, SearchHit, SourceKind};

/// Row-major matrix of unit vectors, one row per chunk. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseIndex {
	dim: usize,
	chunk_ids: Vec<ChunkId>,
	vectors: Vec<f32>,
}

impl DenseIndex {
	/// Pair each chunk with its embedding. Every embedding must have `dim`
	/// components.
	pub fn build(chunks: &[Chunk], embeddings: Vec<Vec<f32>>, dim: usize) -> Result<Self> {
		if chunks.len() != embeddings.len() {
			return Err(Error::Embedding(format!("{} chunks but {} embeddings", chunks.len(), embeddings.len())));
		}
		let rows = chunks.iter().map(|c| c.chunk_id).zip(embeddings).collect();
		Self::from_rows(rows, dim).map_err(|e| match e {
			Error::Search(msg) => Error::Embedding(msg),
			other => other,
		})
	}

	/// Rebuild from persisted `(chunk_id, vector)` rows in any order.
	pub fn from_rows(mut rows: Vec<(ChunkId, Vec<f32>)>, dim: usize) -> Result<Self> {
		if dim == 0 {
			return Err(Error::Search("embedding dimension must be positive".into()));
		}
		rows.sort_by_key(|(id, _)| *id);
		let mut chunk_ids = Vec::with_capacity(rows.len());
		let mut vectors = Vec::with_capacity(rows.len() * dim);
		for (id, v) in rows {
			if v.len() != dim {
				return Err(Error::Search(format!("chunk {id} has {} components, expected {dim}", v.len())));
			}
			chunk_ids.push(id);
			vectors.extend(v);
		}
		debug!(rows = chunk_ids.len(), dim, "built dense index");
		Ok(Self { dim, chunk_ids, vectors })
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	pub fn len(&self) -> usize {
		self.chunk_ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.chunk_ids.is_empty()
	}

	pub fn rows(&self) -> impl Iterator<Item = (ChunkId, &[f32])> + '_ {
		self.chunk_ids.iter().copied().zip(self.vectors.chunks_exact(self.dim))
	}

	/// Exact top `k` by inner product, ties by lower chunk id.
	pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
		if query.len() != self.dim {
			return Err(Error::Search(format!("query has {} components, index expects {}", query.len(), self.dim)));
		}
		let mut scored: Vec<(ChunkId, f32)> = self
			.rows()
			.map(|(id, v)| (id, v.iter().zip(query).map(|(a, b)| a * b).sum::<f32>()))
			.collect();
		scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
		scored.truncate(k);
		Ok(scored
			.into_iter()
			.map(|(chunk_id, score)| SearchHit { chunk_id, score, source: SourceKind::Dense })
			.collect())
	}
}
