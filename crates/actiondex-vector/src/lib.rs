//! actiondex-vector
//!
//! Exact inner-product search over chunk embeddings ([`dense`]) and the
//! LanceDB table the vectors are persisted in ([`artifact`]).
pub mod artifact;
pub mod dense;
pub mod schema;

pub use dense::DenseIndex;
