use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use actiondex_core::types::SearchOutcome;

use crate::retriever::ActionRetriever;

/// Returned verbatim when nothing relevant was found.
pub const NO_ACTION_FOUND: &str = "NO_ACTION_FOUND";

/// Agent-facing wrapper: turns a search into the text block the calling
/// agent reads, and remembers which sources it cited.
pub struct ActionTool {
	retriever: Arc<ActionRetriever>,
	last_sources: Mutex<Vec<String>>,
}

impl ActionTool {
	pub const NAME: &'static str = "master_actions_guide";
	pub const DESCRIPTION: &'static str = "Provides step-by-step instructions with direct links for performing HR system actions. \
		Use it when the user asks how to do something specific or asks for links to HR portals and resources.";

	pub fn new(retriever: Arc<ActionRetriever>) -> Self {
		Self { retriever, last_sources: Mutex::new(Vec::new()) }
	}

	pub fn retriever(&self) -> &ActionRetriever {
		&self.retriever
	}

	pub fn run(&self, query: &str) -> String {
		let outcome = self.retriever.search(query);
		let (text, sources) = render(&outcome);
		*self.last_sources.lock().unwrap_or_else(PoisonError::into_inner) = sources;
		text
	}

	/// Sources cited by the most recent [`run`](Self::run).
	pub fn last_sources(&self) -> Vec<String> {
		self.last_sources.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub fn clear_last_sources(&self) {
		self.last_sources.lock().unwrap_or_else(PoisonError::into_inner).clear();
	}
}

/// Text for `outcome` and the distinct source names it cites, in order of
/// first appearance.
pub fn render(outcome: &SearchOutcome) -> (String, Vec<String>) {
	let results = match outcome {
		SearchOutcome::Found(results) if !results.is_empty() => results,
		_ => return (NO_ACTION_FOUND.to_string(), Vec::new()),
	};
	let mut out = format!("Found {} relevant action(s):\n\n", results.len());
	let mut sources: Vec<String> = Vec::new();
	for (i, r) in results.iter().enumerate() {
		let _ = write!(out, "**[{}]** (Score: {:.3})\n{}\n\n", i + 1, r.score, r.content);
		if !sources.contains(&r.source_name) {
			sources.push(r.source_name.clone());
		}
	}
	let _ = writeln!(out, "Sources: {}", sources.join(" • "));
	(out, sources)
}
