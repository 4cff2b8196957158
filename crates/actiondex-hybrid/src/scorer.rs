//! Final scoring of fused candidates and the confidence gate.
//!
//! `score = 1/(rank + 1) + 0.1 * matched query words + 0.2 if the chunk looks
//! like an action (links, numbered steps, UI verbs)`. Matching is by
//! lower-cased substring, so "leave" also matches "leaves".
use std::sync::OnceLock;

use regex::Regex;

use actiondex_core::config::RetrievalConfig;
use actiondex_core::types::{Chunk, SearchOutcome, SearchResult};

pub const KEYWORD_BOOST: f32 = 0.1;
pub const MARKER_BOOST: f32 = 0.2;

pub const STOP_WORDS: [&str; 15] = ["a", "an", "the", "is", "are", "to", "for", "of", "in", "on", "how", "what", "i", "my", "can"];

pub const ACTION_MARKERS: [&str; 8] = ["link:", "steps:", "step 1", "step 2", "click", "navigate", "select", "action name:"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultScorer {
	pub confidence_threshold: f32,
}

impl ResultScorer {
	pub fn new(confidence_threshold: f32) -> Self {
		Self { confidence_threshold }
	}

	pub fn from_config(config: &RetrievalConfig) -> Self {
		Self::new(config.confidence_threshold)
	}

	/// Score `candidates` (fused order) against the unexpanded `query`, then
	/// stable-sort by score and keep `top_k`.
	pub fn score(&self, query: &str, candidates: &[&Chunk], top_k: usize) -> Vec<SearchResult> {
		let terms = query_terms(query);
		let mut results: Vec<SearchResult> = candidates
			.iter()
			.enumerate()
			.map(|(rank, chunk)| SearchResult {
				content: chunk.text.clone(),
				source_name: chunk.source_name.clone(),
				score: score_chunk(&terms, &chunk.text, rank),
				chunk_id: chunk.chunk_id,
			})
			.collect();
		results.sort_by(|a, b| b.score.total_cmp(&a.score));
		results.truncate(top_k);
		results
	}

	/// `NoMatch` when there is nothing or the best score is under the threshold.
	pub fn gate(&self, results: Vec<SearchResult>) -> SearchOutcome {
		gate(results, self.confidence_threshold)
	}
}

pub fn gate(results: Vec<SearchResult>, threshold: f32) -> SearchOutcome {
	match results.iter().map(|r| r.score).reduce(f32::max) {
		Some(best) if best >= threshold => SearchOutcome::Found(results),
		_ => SearchOutcome::NoMatch,
	}
}

/// Distinct lower-cased `\w+` words of `query`, stop words removed, in order
/// of first appearance.
pub fn query_terms(query: &str) -> Vec<String> {
	static WORD: OnceLock<Option<Regex>> = OnceLock::new();
	let Some(word) = WORD.get_or_init(|| Regex::new(r"\w+").ok()) else {
		return Vec::new();
	};
	let lower = query.to_lowercase();
	let mut terms: Vec<String> = Vec::new();
	for m in word.find_iter(&lower) {
		let w = m.as_str();
		if !STOP_WORDS.contains(&w) && !terms.iter().any(|t| t == w) {
			terms.push(w.to_string());
		}
	}
	terms
}

pub fn score_chunk(terms: &[String], text: &str, rank: usize) -> f32 {
	let lower = text.to_lowercase();
	let base = 1.0 / (rank as f32 + 1.0);
	let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
	let marker = if ACTION_MARKERS.iter().any(|m| lower.contains(m)) { MARKER_BOOST } else { 0.0 };
	base + KEYWORD_BOOST * matched as f32 + marker
}
