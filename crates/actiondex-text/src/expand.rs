//! Synonym expansion for lexical recall.
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use actiondex_core::config::{default_expansions, RetrievalConfig};

#[derive(Debug, Clone)]
pub struct QueryExpander {
	table: BTreeMap<String, Vec<String>>,
}

impl Default for QueryExpander {
	fn default() -> Self {
		Self::new(default_expansions())
	}
}

impl QueryExpander {
	pub fn new(table: BTreeMap<String, Vec<String>>) -> Self {
		let table = table.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
		Self { table }
	}

	pub fn from_config(config: &RetrievalConfig) -> Self {
		Self::new(config.expansions.clone())
	}

	/// Lower-case and trim `query`, then append the synonyms of every keyword
	/// it contains. Keywords are visited in sorted order; a synonym is added
	/// at most once and never when the query already has it as whole words.
	pub fn expand(&self, query: &str) -> String {
		let base = query.trim().to_lowercase();
		let padded = format!(" {} ", base.split_whitespace().collect::<Vec<_>>().join(" "));
		let mut added: BTreeSet<String> = BTreeSet::new();
		let mut extra: Vec<String> = Vec::new();
		for (keyword, synonyms) in &self.table {
			if keyword.is_empty() || !base.contains(keyword.as_str()) {
				continue;
			}
			for syn in synonyms {
				let syn = syn.trim().to_lowercase();
				if syn.is_empty() || padded.contains(&format!(" {syn} ")) || !added.insert(syn.clone()) {
					continue;
				}
				extra.push(syn);
			}
		}
		if extra.is_empty() {
			return base;
		}
		let expanded = format!("{base} {}", extra.join(" "));
		debug!(query = %base, expanded = %expanded, "expanded query");
		expanded
	}
}
