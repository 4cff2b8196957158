use std::sync::OnceLock;

use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Word-boundary split followed by case folding. No stop words: BM25 IDF
/// already discounts them and exact action names must stay matchable.
pub fn build_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.build()
}

fn shared_analyzer() -> &'static TextAnalyzer {
	static ANALYZER: OnceLock<TextAnalyzer> = OnceLock::new();
	ANALYZER.get_or_init(build_analyzer)
}

/// Tokens of `text` in order, duplicates kept.
pub fn tokenize(text: &str) -> Vec<String> {
	// token_stream needs &mut, so each call works on its own clone.
	let mut analyzer = shared_analyzer().clone();
	let mut stream = analyzer.token_stream(text);
	let mut tokens = Vec::new();
	stream.process(&mut |token| tokens.push(token.text.clone()));
	tokens
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_on_punctuation_and_lowercases() {
		assert_eq!(tokenize("Action Name: Apply-Leave, Step 1!"), vec!["action", "name", "apply", "leave", "step", "1"]);
	}

	#[test]
	fn keeps_duplicates_and_empty_input_is_empty() {
		assert_eq!(tokenize("leave LEAVE leave"), vec!["leave"; 3]);
		assert!(tokenize("  ... ").is_empty());
	}
}
