/// Injected text-to-vector capability.
///
/// Implementations must return vectors of exactly `dim()` components with unit
/// L2 norm, so inner product equals cosine similarity.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `hash:xxh64:d256`). Part of the
    /// index fingerprint, so swapping models invalidates persisted indexes.
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
