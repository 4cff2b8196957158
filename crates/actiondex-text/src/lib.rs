//! actiondex-text
//!
//! Lexical side of retrieval: word tokenisation, the BM25 sparse index and
//! synonym-based query expansion.
pub mod bm25;
pub mod expand;
pub mod tokenizer;

pub use bm25::SparseIndex;
pub use expand::QueryExpander;
pub use tokenizer::tokenize;
