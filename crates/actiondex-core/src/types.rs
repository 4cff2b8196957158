//! Domain types shared by the sparse, dense and hybrid layers.

use serde::{Deserialize, Serialize};

/// Position of a chunk within one build. Dense and 0-based.
pub type ChunkId = u32;

/// Document type assigned when the caller does not provide one.
pub const DEFAULT_DOCUMENT_TYPE: &str = "master_actions";

/// A decoded source document handed to the build pipeline.
///
/// The metadata set is closed: anything beyond these fields is dropped by
/// whatever decoded the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub raw_text: String,
    pub source_name: String,
    pub source_path: String,
    pub document_type: String,
}

impl Document {
    pub fn new(source_name: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let source_name = source_name.into();
        Self {
            id: source_name.clone(),
            raw_text: raw_text.into(),
            source_path: source_name.clone(),
            source_name,
            document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = source_path.into();
        self
    }

    #[must_use]
    pub fn with_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = document_type.into();
        self
    }
}

/// A bounded span of document text; the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub text: String,
    pub source_name: String,
    pub document_type: String,
}

/// Indicates which index produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Sparse,
    Dense,
}

/// A ranked candidate from a single index. Higher `score` is better; the
/// scale is index-specific and only the rank is used for fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

/// A scored passage returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub source_name: String,
    pub score: f32,
    pub chunk_id: ChunkId,
}

/// What a search hands back: confident results or an explicit miss.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Non-empty, and the best score cleared the confidence threshold.
    Found(Vec<SearchResult>),
    /// Nothing relevant enough; callers should not look for content.
    NoMatch,
}

impl SearchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn results(&self) -> &[SearchResult] {
        match self {
            Self::Found(results) => results,
            Self::NoMatch => &[],
        }
    }

    pub fn best_score(&self) -> Option<f32> {
        self.results().iter().map(|r| r.score).reduce(f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_defaults_path_and_type_from_name() {
        let doc = Document::new("guide.txt", "text");
        assert_eq!(doc.id, "guide.txt");
        assert_eq!(doc.source_path, "guide.txt");
        assert_eq!(doc.document_type, DEFAULT_DOCUMENT_TYPE);
    }

    #[test]
    fn no_match_has_no_results() {
        assert!(SearchOutcome::NoMatch.results().is_empty());
        assert_eq!(SearchOutcome::NoMatch.best_score(), None);
    }
}
