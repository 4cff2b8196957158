//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `actiondex.toml`,
//! `actiondex.<env>.toml` and `ACTIONDEX_*` env vars (`__` separates nested
//! keys, e.g. `ACTIONDEX_RETRIEVAL__CONFIDENCE_THRESHOLD=0.4`).
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "ACTIONDEX_";

/// Build and query settings of the retriever.
///
/// Defaults are tuned for short procedural documents: small chunks so a
/// single action's steps stay together, and a lexical bias in fusion because
/// users tend to name actions exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
    pub confidence_threshold: f32,
    pub index_ttl_secs: u64,
    pub cache_ttl_secs: u64,
    /// Upper bound on cached queries, in memory and on disk each.
    pub cache_max_entries: u64,
    pub embed_batch_size: usize,
    /// Keyword → synonyms appended by the query expander.
    pub expansions: BTreeMap<String, Vec<String>>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 150,
            top_k: 5,
            bm25_weight: 0.6,
            vector_weight: 0.4,
            confidence_threshold: 0.3,
            index_ttl_secs: 24 * 60 * 60,
            cache_ttl_secs: 60 * 60,
            cache_max_entries: 1024,
            embed_batch_size: 32,
            expansions: default_expansions(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be positive".into()));
        }
        for (name, w) in [("bm25_weight", self.bm25_weight), ("vector_weight", self.vector_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Config(format!("{name} must be a finite non-negative number, got {w}")));
            }
        }
        if self.bm25_weight + self.vector_weight <= 0.0 {
            return Err(Error::Config("at least one fusion weight must be positive".into()));
        }
        if !self.confidence_threshold.is_finite() {
            return Err(Error::Config("confidence_threshold must be finite".into()));
        }
        if self.index_ttl_secs == 0 || self.cache_ttl_secs == 0 {
            return Err(Error::Config("ttl values must be positive".into()));
        }
        if self.cache_max_entries == 0 {
            return Err(Error::Config("cache_max_entries must be positive".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config("embed_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Synonyms for the HR self-service actions users ask about most.
pub fn default_expansions() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 11] = [
        ("apply", &["request", "submit", "file"]),
        ("download", &["get", "access", "view", "fetch"]),
        ("leave", &["vacation", "time off", "absence", "pto"]),
        ("payslip", &["salary slip", "pay stub", "salary statement"]),
        ("profile", &["personal details", "employee info", "my details"]),
        ("training", &["learning", "course", "certification", "skill"]),
        ("expense", &["reimbursement", "claim", "travel claim"]),
        ("attendance", &["punch", "check in", "clock"]),
        ("holiday", &["calendar", "public holiday", "company holiday"]),
        ("form-16", &["tax form", "income tax", "tds"]),
        ("balance", &["remaining", "available", "quota"]),
    ];
    table
        .iter()
        .map(|(k, syns)| ((*k).to_string(), syns.iter().map(|s| (*s).to_string()).collect()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for persisted indexes and the query cache. `~` and `$VAR` expand.
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: "./.actiondex".to_string() }
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Load from the current directory, picking the env overlay from `RUST_ENV`.
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    pub fn load_from(dir: &Path, env_name: &str) -> Result<Self> {
        let mut figment = Self::defaults().merge(Toml::file(dir.join("actiondex.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("actiondex.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("actiondex.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("actiondex.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = Self { figment };
        config.retrieval()?;
        Ok(config)
    }

    /// Built-in defaults every other provider is layered on.
    pub fn defaults() -> Figment {
        Figment::new()
            .merge(Serialized::default("retrieval", RetrievalConfig::default()))
            .merge(Serialized::default("storage", StorageConfig::default()))
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::Config(format!("Failed to get '{key}': {e}")))
    }

    /// The validated `[retrieval]` section.
    pub fn retrieval(&self) -> Result<RetrievalConfig> {
        let retrieval: RetrievalConfig = self.get("retrieval")?;
        retrieval.validate()?;
        Ok(retrieval)
    }

    pub fn storage_root(&self) -> Result<PathBuf> {
        let storage: StorageConfig = self.get("storage")?;
        Ok(expand_path(storage.root))
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Config {
        Config::from_figment(Config::defaults().merge(Toml::string(toml)))
    }

    #[test]
    fn defaults_match_the_action_profile() {
        let cfg = from_toml("").retrieval().expect("defaults");
        assert_eq!(cfg.chunk_size, 600);
        assert_eq!(cfg.chunk_overlap, 150);
        assert_eq!(cfg.top_k, 5);
        assert!((cfg.bm25_weight - 0.6).abs() < f32::EPSILON);
        assert!((cfg.vector_weight - 0.4).abs() < f32::EPSILON);
        assert!((cfg.confidence_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.index_ttl(), Duration::from_secs(86_400));
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(3_600));
        assert_eq!(cfg.cache_max_entries, 1024);
        assert_eq!(cfg.expansions["apply"], vec!["request", "submit", "file"]);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = from_toml("[retrieval]\nchunk_size = 50\nchunk_overlap = 10\n").retrieval().expect("cfg");
        assert_eq!(cfg.chunk_size, 50);
        assert_eq!(cfg.chunk_overlap, 10);
        assert_eq!(cfg.top_k, 5);
    }

    #[test]
    fn negative_chunk_size_is_a_config_error() {
        let err = from_toml("[retrieval]\nchunk_size = -5\n").retrieval().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = from_toml("[retrieval]\nchunk_size = 100\nchunk_overlap = 100\n").retrieval().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_weights_are_rejected() {
        let cfg = RetrievalConfig { bm25_weight: 0.0, vector_weight: 0.0, ..RetrievalConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_query_cache_is_rejected() {
        let err = from_toml("[retrieval]\ncache_max_entries = 0\n").retrieval().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn storage_root_expands_env_vars() {
        std::env::set_var("ACTIONDEX_TEST_ROOT", "/tmp/actiondex-root");
        let cfg = from_toml("[storage]\nroot = \"${ACTIONDEX_TEST_ROOT}/store\"\n");
        assert_eq!(cfg.storage_root().expect("root"), PathBuf::from("/tmp/actiondex-root/store"));
    }
}
