//! actiondex-hybrid
//!
//! Hybrid retrieval over action documents: BM25 and dense rankings fused by
//! weighted reciprocal rank, re-scored, gated by confidence, persisted by
//! fingerprint and cached per query.
pub mod bundle;
pub mod cache;
pub mod ensemble;
pub mod retriever;
pub mod scorer;
pub mod store;
pub mod tool;

pub use bundle::IndexBundle;
pub use cache::{CacheKey, QueryCache};
pub use ensemble::EnsembleRetriever;
pub use retriever::{ActionRetriever, BuildOutcome, RetrieverState};
pub use scorer::ResultScorer;
pub use store::IndexStore;
pub use tool::{ActionTool, NO_ACTION_FOUND};
