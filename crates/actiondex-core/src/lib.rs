//! actiondex-core
//!
//! Shared types, configuration, errors, corpus handling, chunking and version
//! fingerprints for the actiondex retrieval workspace.

pub mod chunking;
pub mod config;
pub mod corpus;
pub mod error;
pub mod fingerprint;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
