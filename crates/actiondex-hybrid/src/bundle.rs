use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use actiondex_core::error::{Error, Result};
use actiondex_core::fingerprint::Fingerprint;
use actiondex_core::traits::Embedder;
use actiondex_core::types::{Chunk, ChunkId};
use actiondex_text::SparseIndex;
use actiondex_vector::DenseIndex;

/// Called after every embedded batch with `(chunks_done, chunks_total)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Everything one build produces. Never mutated once installed.
#[derive(Debug, Clone)]
pub struct IndexBundle {
	pub sparse: SparseIndex,
	pub dense: DenseIndex,
	pub chunks: Vec<Chunk>,
	pub fingerprint: Fingerprint,
	pub built_at: DateTime<Utc>,
}

impl IndexBundle {
	/// Index `chunks` lexically and embed them in batches of `batch_size`.
	pub async fn build(
		chunks: Vec<Chunk>,
		embedder: Arc<dyn Embedder>,
		batch_size: usize,
		fingerprint: Fingerprint,
		progress: Option<ProgressFn>,
	) -> Result<Self> {
		if chunks.is_empty() {
			return Err(Error::CorpusEmpty);
		}
		let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
		let dim = embedder.dim();
		let embeddings = tokio::task::spawn_blocking(move || embed_all(embedder.as_ref(), &texts, batch_size, progress.as_deref()))
			.await
			.map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))??;

		let dense = DenseIndex::build(&chunks, embeddings, dim)?;
		let sparse = SparseIndex::build(&chunks);
		info!(chunks = chunks.len(), dim, fingerprint = %fingerprint.short(), "built index bundle");
		Ok(Self { sparse, dense, chunks, fingerprint, built_at: Utc::now() })
	}

	pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
		match self.chunks.get(id as usize) {
			Some(c) if c.chunk_id == id => Some(c),
			_ => self.chunks.iter().find(|c| c.chunk_id == id),
		}
	}
}

fn embed_all(embedder: &dyn Embedder, texts: &[String], batch_size: usize, progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>) -> Result<Vec<Vec<f32>>> {
	let dim = embedder.dim();
	let mut out = Vec::with_capacity(texts.len());
	for batch in texts.chunks(batch_size.max(1)) {
		let vectors = embedder.embed_batch(batch).map_err(|e| Error::Embedding(format!("{}: {e:#}", embedder.embedder_id())))?;
		if vectors.len() != batch.len() {
			return Err(Error::Embedding(format!("embedder returned {} vectors for {} texts", vectors.len(), batch.len())));
		}
		if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
			return Err(Error::Embedding(format!("embedder returned {} components, expected {dim}", bad.len())));
		}
		out.extend(vectors);
		if let Some(report) = progress {
			report(out.len(), texts.len());
		}
	}
	Ok(out)
}
