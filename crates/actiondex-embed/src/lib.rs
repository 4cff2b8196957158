//! actiondex-embed
//!
//! Embedders for the dense index. [`HashEmbedder`] is always available and
//! deterministic; the candle BERT embedder needs the `bert` feature and a
//! local model directory.
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;

use actiondex_core::traits::Embedder;

pub mod hash;
#[cfg(feature = "bert")]
pub mod bert;
#[cfg(feature = "bert")]
pub mod device;
#[cfg(feature = "bert")]
pub mod pool;

pub use hash::{HashEmbedder, DEFAULT_HASH_DIM};
#[cfg(feature = "bert")]
pub use pool::masked_mean_l2;

/// Pick the embedder named by `ACTIONDEX_EMBEDDER` (`hash` by default, or
/// `bert` when built with that feature).
pub fn get_default_embedder() -> Result<Arc<dyn Embedder>> {
    let kind = std::env::var("ACTIONDEX_EMBEDDER").unwrap_or_else(|_| "hash".to_string());
    embedder_by_name(&kind)
}

pub fn embedder_by_name(kind: &str) -> Result<Arc<dyn Embedder>> {
    match kind.to_ascii_lowercase().as_str() {
        "hash" | "" => {
            info!(dim = DEFAULT_HASH_DIM, "using hash embedder");
            Ok(Arc::new(HashEmbedder::default()))
        }
        #[cfg(feature = "bert")]
        "bert" => Ok(Arc::new(bert::BertEmbedder::load(&bert::resolve_model_dir()?)?)),
        other => bail!("unknown embedder '{other}'"),
    }
}
