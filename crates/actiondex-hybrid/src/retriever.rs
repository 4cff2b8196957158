//! The retriever ties the pieces together and owns the build state.
//!
//! `Unbuilt --build--> Ready`. A rebuild installs the new bundle with an
//! `Arc` swap, so searches in flight finish on the bundle they started with.
//! Builds are serialised by an async mutex; searches never take it.
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use actiondex_core::chunking::Chunker;
use actiondex_core::config::RetrievalConfig;
use actiondex_core::corpus::Corpus;
use actiondex_core::error::{Error, Result};
use actiondex_core::fingerprint::{Fingerprint, FingerprintConfig, VersionHasher};
use actiondex_core::traits::Embedder;
use actiondex_core::types::{SearchOutcome, SearchResult};
use actiondex_text::QueryExpander;

use crate::bundle::{IndexBundle, ProgressFn};
use crate::cache::{CacheKey, QueryCache};
use crate::ensemble::EnsembleRetriever;
use crate::scorer::ResultScorer;
use crate::store::IndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverState {
	Unbuilt,
	Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
	/// The installed bundle already matches the corpus and config.
	Unchanged,
	/// Restored from the index store.
	Loaded,
	/// Built from the corpus; `persisted` is false when saving failed.
	Built { persisted: bool },
	/// No chunks: the retriever is left unbuilt.
	Empty,
}

pub struct ActionRetriever {
	config: RetrievalConfig,
	embedder: Arc<dyn Embedder>,
	chunker: Chunker,
	expander: QueryExpander,
	ensemble: EnsembleRetriever,
	scorer: ResultScorer,
	store: IndexStore,
	cache: QueryCache,
	bundle: RwLock<Option<Arc<IndexBundle>>>,
	build_lock: Mutex<()>,
	progress: Option<ProgressFn>,
}

impl ActionRetriever {
	/// Persisted indexes and cached queries live under `storage_root`.
	pub fn new(config: RetrievalConfig, embedder: Arc<dyn Embedder>, storage_root: &Path) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			chunker: Chunker::from_config(&config),
			expander: QueryExpander::from_config(&config),
			ensemble: EnsembleRetriever::from_config(&config),
			scorer: ResultScorer::from_config(&config),
			store: IndexStore::new(storage_root, config.index_ttl()),
			cache: QueryCache::with_capacity(storage_root, config.cache_ttl(), config.cache_max_entries),
			bundle: RwLock::new(None),
			build_lock: Mutex::new(()),
			progress: None,
			embedder,
			config,
		})
	}

	/// Report embedding progress during builds.
	#[must_use]
	pub fn with_progress(mut self, progress: ProgressFn) -> Self {
		self.progress = Some(progress);
		self
	}

	pub fn config(&self) -> &RetrievalConfig {
		&self.config
	}

	pub fn store(&self) -> &IndexStore {
		&self.store
	}

	pub fn state(&self) -> RetrieverState {
		if self.bundle().is_some() {
			RetrieverState::Ready
		} else {
			RetrieverState::Unbuilt
		}
	}

	/// The installed bundle, if any.
	pub fn bundle(&self) -> Option<Arc<IndexBundle>> {
		self.bundle.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub fn fingerprint(&self) -> Option<Fingerprint> {
		self.bundle().map(|b| b.fingerprint.clone())
	}

	pub fn fingerprint_for(&self, corpus: &Corpus) -> Fingerprint {
		VersionHasher::compute(&corpus.identity, &FingerprintConfig::new(&self.config, self.embedder.embedder_id()))
	}

	/// Make the retriever ready for `corpus`: reuse the installed bundle, or
	/// restore a persisted one, or build (and persist) a new one.
	///
	/// `force_rebuild` discards persisted bundles first. An embedding failure
	/// is returned and leaves the previously installed bundle in place.
	pub async fn build(&self, corpus: &Corpus, force_rebuild: bool) -> Result<BuildOutcome> {
		let _guard = self.build_lock.lock().await;
		let fingerprint = self.fingerprint_for(corpus);

		if force_rebuild {
			if let Err(e) = self.store.clear() {
				warn!(error = %e, "could not clear persisted indexes before rebuild");
			}
		} else {
			if self.fingerprint().as_ref() == Some(&fingerprint) {
				debug!(fingerprint = %fingerprint.short(), "index already current");
				return Ok(BuildOutcome::Unchanged);
			}
			match self.store.load(&fingerprint).await {
				Ok(Some(bundle)) => {
					self.install(Some(bundle));
					return Ok(BuildOutcome::Loaded);
				}
				Ok(None) => {}
				Err(e) => warn!(error = %e, "could not load persisted index, rebuilding"),
			}
		}

		let chunks = self.chunker.split(&corpus.documents);
		if chunks.is_empty() {
			info!(documents = corpus.documents.len(), "no chunks to index, retriever stays unbuilt");
			self.install(None);
			return Ok(BuildOutcome::Empty);
		}
		info!(documents = corpus.documents.len(), chunks = chunks.len(), fingerprint = %fingerprint.short(), "building index");

		let bundle = match IndexBundle::build(chunks, Arc::clone(&self.embedder), self.config.embed_batch_size, fingerprint, self.progress.clone()).await {
			Ok(bundle) => bundle,
			Err(Error::CorpusEmpty) => {
				self.install(None);
				return Ok(BuildOutcome::Empty);
			}
			Err(e) => return Err(e),
		};
		let persisted = match self.store.save(&bundle).await {
			Ok(_) => true,
			Err(e) => {
				warn!(error = %e, "could not persist index, serving from memory");
				false
			}
		};
		self.install(Some(bundle));
		Ok(BuildOutcome::Built { persisted })
	}

	/// Search with the configured `top_k`.
	pub fn search(&self, query: &str) -> SearchOutcome {
		self.search_top_k(query, self.config.top_k)
	}

	/// Expanded, cached, fused, scored and gated. Failures become `NoMatch`.
	pub fn search_top_k(&self, query: &str, top_k: usize) -> SearchOutcome {
		let Some(bundle) = self.bundle() else {
			debug!("search before build");
			return SearchOutcome::NoMatch;
		};
		if query.trim().is_empty() || top_k == 0 {
			return SearchOutcome::NoMatch;
		}
		let expanded = self.expander.expand(query);
		let key = CacheKey::new(bundle.fingerprint.clone(), expanded.clone(), top_k);
		match self.cache.get_or_compute(&key, || self.rank(&bundle, query, &expanded, top_k)) {
			Ok(results) => self.scorer.gate(results),
			Err(e) => {
				warn!(error = %e, query, "search failed");
				SearchOutcome::NoMatch
			}
		}
	}

	/// Scored results without the confidence gate or the cache.
	pub fn inspect(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
		let Some(bundle) = self.bundle() else {
			return Ok(Vec::new());
		};
		let expanded = self.expander.expand(query);
		self.rank(&bundle, query, &expanded, top_k)
	}

	pub fn clear_query_cache(&self) {
		self.cache.clear_all();
	}

	/// Drop persisted bundles and unload the installed one.
	pub fn clear_index(&self) -> Result<()> {
		self.install(None);
		self.store.clear()
	}

	fn rank(&self, bundle: &IndexBundle, query: &str, expanded: &str, top_k: usize) -> Result<Vec<SearchResult>> {
		let query_vector = self
			.embedder
			.embed_batch(&[expanded.to_string()])
			.map_err(|e| Error::Search(format!("embedding query: {e:#}")))?
			.into_iter()
			.next()
			.ok_or_else(|| Error::Search("embedder returned no vector for the query".into()))?;
		let candidates = self.ensemble.retrieve(bundle, expanded, &query_vector, top_k)?;
		Ok(self.scorer.score(query, &candidates, top_k))
	}

	fn install(&self, bundle: Option<IndexBundle>) {
		let next = bundle.map(Arc::new);
		let current = next.as_ref().map(|b| b.fingerprint.clone());
		*self.bundle.write().unwrap_or_else(PoisonError::into_inner) = next;
		// Results cached against an earlier bundle can never be hit again.
		if let Some(fingerprint) = current {
			self.cache.retain_fingerprint(&fingerprint);
		}
	}
}
