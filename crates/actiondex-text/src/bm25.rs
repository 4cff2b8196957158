//! Okapi BM25 over chunk tokens.
//!
//! Inverse document frequency uses the `ln((N - n + 0.5) / (n + 0.5))` form;
//! terms present in more than half the chunks would get a negative IDF, which
//! is replaced by `EPSILON` times the mean IDF of the vocabulary.
//!
//! Only the integer statistics (postings, document lengths) are serialised.
//! IDF and the average length are derived again on deserialisation, so a
//! loaded index ranks exactly like the one that was saved.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use actiondex_core::types::{Chunk, ChunkId, SearchHit, SourceKind};

use crate::tokenizer::tokenize;

pub const K1: f64 = 1.5;
pub const B: f64 = 0.75;
pub const EPSILON: f64 = 0.25;

/// Serialised form: term → `(chunk position, term frequency)` in position
/// order, plus per-chunk token counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparsePostings {
	pub chunk_ids: Vec<ChunkId>,
	pub doc_lens: Vec<u32>,
	pub postings: BTreeMap<String, Vec<(u32, u32)>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "SparsePostings", try_from = "SparsePostings")]
pub struct SparseIndex {
	chunk_ids: Vec<ChunkId>,
	doc_lens: Vec<u32>,
	postings: BTreeMap<String, Vec<(u32, u32)>>,
	idf: HashMap<String, f64>,
	avgdl: f64,
}

impl SparseIndex {
	pub fn build(chunks: &[Chunk]) -> Self {
		let mut chunk_ids = Vec::with_capacity(chunks.len());
		let mut doc_lens = Vec::with_capacity(chunks.len());
		let mut postings: BTreeMap<String, Vec<(u32, u32)>> = BTreeMap::new();
		for (pos, chunk) in chunks.iter().enumerate() {
			let tokens = tokenize(&chunk.text);
			chunk_ids.push(chunk.chunk_id);
			doc_lens.push(tokens.len() as u32);
			let mut tf: BTreeMap<String, u32> = BTreeMap::new();
			for t in tokens {
				*tf.entry(t).or_insert(0) += 1;
			}
			for (term, freq) in tf {
				postings.entry(term).or_default().push((pos as u32, freq));
			}
		}
		let index = Self::from_parts(chunk_ids, doc_lens, postings);
		debug!(chunks = index.len(), terms = index.postings.len(), avgdl = index.avgdl, "built sparse index");
		index
	}

	fn from_parts(chunk_ids: Vec<ChunkId>, doc_lens: Vec<u32>, postings: BTreeMap<String, Vec<(u32, u32)>>) -> Self {
		let n = doc_lens.len() as f64;
		let avgdl = if doc_lens.is_empty() {
			0.0
		} else {
			doc_lens.iter().map(|&l| f64::from(l)).sum::<f64>() / n
		};

		let mut idf = HashMap::with_capacity(postings.len());
		let mut idf_sum = 0.0;
		let mut negative = Vec::new();
		for (term, list) in &postings {
			let df = list.len() as f64;
			let value = (n - df + 0.5).ln() - (df + 0.5).ln();
			idf_sum += value;
			if value < 0.0 {
				negative.push(term.clone());
			}
			idf.insert(term.clone(), value);
		}
		if !postings.is_empty() {
			let floor = EPSILON * idf_sum / postings.len() as f64;
			for term in negative {
				idf.insert(term, floor);
			}
		}
		Self { chunk_ids, doc_lens, postings, idf, avgdl }
	}

	pub fn len(&self) -> usize {
		self.chunk_ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.chunk_ids.is_empty()
	}

	/// Top `k` chunks with a positive score, best first, ties by lower id.
	/// Repeated query tokens count once per occurrence.
	pub fn score(&self, query_tokens: &[String], k: usize) -> Vec<SearchHit> {
		if k == 0 || self.is_empty() {
			return Vec::new();
		}
		let mut scores = vec![0.0f64; self.len()];
		for token in query_tokens {
			let (Some(list), Some(&idf)) = (self.postings.get(token), self.idf.get(token)) else {
				continue;
			};
			for &(pos, tf) in list {
				let tf = f64::from(tf);
				let dl = f64::from(self.doc_lens[pos as usize]);
				let norm = if self.avgdl > 0.0 { dl / self.avgdl } else { 0.0 };
				scores[pos as usize] += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * norm));
			}
		}

		let mut ranked: Vec<(ChunkId, f64)> = scores
			.into_iter()
			.enumerate()
			.filter(|(_, s)| *s > 0.0)
			.map(|(pos, s)| (self.chunk_ids[pos], s))
			.collect();
		ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
		ranked.truncate(k);
		ranked
			.into_iter()
			.map(|(chunk_id, s)| SearchHit { chunk_id, score: s as f32, source: SourceKind::Sparse })
			.collect()
	}

	/// Tokenise `query` and score it.
	pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
		self.score(&tokenize(query), k)
	}
}

impl From<SparseIndex> for SparsePostings {
	fn from(index: SparseIndex) -> Self {
		Self { chunk_ids: index.chunk_ids, doc_lens: index.doc_lens, postings: index.postings }
	}
}

impl TryFrom<SparsePostings> for SparseIndex {
	type Error = String;

	fn try_from(p: SparsePostings) -> Result<Self, Self::Error> {
		if p.chunk_ids.len() != p.doc_lens.len() {
			return Err(format!("{} chunk ids but {} document lengths", p.chunk_ids.len(), p.doc_lens.len()));
		}
		let n = p.doc_lens.len();
		for (term, list) in &p.postings {
			if list.iter().any(|&(pos, _)| pos as usize >= n) {
				return Err(format!("posting for '{term}' points past {n} chunks"));
			}
		}
		Ok(Self::from_parts(p.chunk_ids, p.doc_lens, p.postings))
	}
}
