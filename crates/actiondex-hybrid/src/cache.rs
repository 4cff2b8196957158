//! Per-query result cache with a TTL and a size bound.
//!
//! Two tiers: a moka cache in process, and one JSON file per key under
//! `<root>/query_cache/` named by the blake3 digest of the key. Writers race
//! last-writer-wins through temp file + rename. Disk failures are logged and
//! otherwise ignored: the cache is an optimisation.
//!
//! The disk tier is swept every [`SWEEP_EVERY`] writes and whenever the
//! retriever installs a new bundle: expired entries, entries of other
//! fingerprints and, past `max_entries`, the entries closest to expiry go.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use actiondex_core::error::Result;
use actiondex_core::fingerprint::Fingerprint;
use actiondex_core::types::SearchResult;

pub const CACHE_DIR: &str = "query_cache";
pub const DEFAULT_MAX_ENTRIES: u64 = 1024;
pub const SWEEP_EVERY: usize = 64;

// moka rejects TTLs beyond 1000 years.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
	pub fingerprint: Fingerprint,
	pub expanded_query: String,
	pub top_k: usize,
}

impl CacheKey {
	pub fn new(fingerprint: Fingerprint, expanded_query: impl Into<String>, top_k: usize) -> Self {
		Self { fingerprint, expanded_query: expanded_query.into(), top_k }
	}

	/// Stable file-name-safe digest of the key.
	pub fn digest(&self) -> String {
		let mut hasher = blake3::Hasher::new();
		for part in [self.fingerprint.as_str().as_bytes(), self.expanded_query.as_bytes(), &(self.top_k as u64).to_le_bytes()[..]] {
			hasher.update(&(part.len() as u64).to_le_bytes());
			hasher.update(part);
		}
		hasher.finalize().to_hex().to_string()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
	key: CacheKey,
	results: Vec<SearchResult>,
	expires_at: DateTime<Utc>,
}

pub struct QueryCache {
	dir: Option<PathBuf>,
	ttl: TimeDelta,
	max_entries: u64,
	memory: Cache<CacheKey, CacheEntry>,
	writes: AtomicUsize,
}

impl QueryCache {
	pub fn new(root: &Path, ttl: Duration) -> Self {
		Self::with_capacity(root, ttl, DEFAULT_MAX_ENTRIES)
	}

	pub fn with_capacity(root: &Path, ttl: Duration, max_entries: u64) -> Self {
		Self::build(Some(root.join(CACHE_DIR)), ttl, max_entries)
	}

	/// Memory tier only.
	pub fn in_memory(ttl: Duration, max_entries: u64) -> Self {
		Self::build(None, ttl, max_entries)
	}

	fn build(dir: Option<PathBuf>, ttl: Duration, max_entries: u64) -> Self {
		let ttl = ttl.min(MAX_TTL);
		let memory = Cache::builder()
			.max_capacity(max_entries)
			.time_to_live(ttl)
			.support_invalidation_closures()
			.build();
		Self {
			dir,
			ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
			max_entries,
			memory,
			writes: AtomicUsize::new(0),
		}
	}

	pub fn get(&self, key: &CacheKey) -> Option<Vec<SearchResult>> {
		let now = Utc::now();
		if let Some(entry) = self.memory.get(key) {
			// A disk entry promoted late can expire before moka's own TTL.
			if entry.expires_at > now {
				debug!(query = %key.expanded_query, "query cache hit (memory)");
				return Some(entry.results);
			}
			self.memory.invalidate(key);
		}

		let entry = self.read_disk(key)?;
		if entry.expires_at <= now {
			self.remove_disk(key);
			return None;
		}
		debug!(query = %key.expanded_query, "query cache hit (disk)");
		let results = entry.results.clone();
		self.memory.insert(key.clone(), entry);
		Some(results)
	}

	pub fn put(&self, key: &CacheKey, results: &[SearchResult]) {
		let entry = CacheEntry { key: key.clone(), results: results.to_vec(), expires_at: Utc::now().checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC) };
		self.write_disk(&entry);
		self.memory.insert(key.clone(), entry);
		if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
			self.sweep(None);
		}
	}

	/// Cached results for `key`, or run `compute` and cache what it returns.
	/// Errors are passed through and not cached.
	pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<Vec<SearchResult>>
	where
		F: FnOnce() -> Result<Vec<SearchResult>>,
	{
		if let Some(hit) = self.get(key) {
			return Ok(hit);
		}
		debug!(query = %key.expanded_query, "query cache miss");
		let results = compute()?;
		self.put(key, &results);
		Ok(results)
	}

	/// Drop every entry computed against a fingerprint other than `current`.
	pub fn retain_fingerprint(&self, current: &Fingerprint) {
		let keep = current.clone();
		if let Err(e) = self.memory.invalidate_entries_if(move |key, _| key.fingerprint != keep) {
			warn!(error = %e, "could not invalidate stale query cache entries");
		}
		self.sweep(Some(current));
	}

	/// Bound the disk tier: remove expired and unreadable entries, entries of
	/// fingerprints other than `current` (when given), then the entries
	/// closest to expiry until at most `max_entries` remain. Returns how
	/// many files were removed.
	pub fn sweep(&self, current: Option<&Fingerprint>) -> usize {
		let Some(dir) = &self.dir else {
			return 0;
		};
		let listing = match fs::read_dir(dir) {
			Ok(listing) => listing,
			Err(e) if e.kind() == ErrorKind::NotFound => return 0,
			Err(e) => {
				warn!(dir = %dir.display(), error = %e, "could not list query cache");
				return 0;
			}
		};
		let now = Utc::now();
		let mut removed = 0;
		let mut live: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
		for path in listing.flatten().map(|e| e.path()) {
			if path.extension().and_then(|e| e.to_str()) != Some("json") {
				continue;
			}
			let entry = fs::read(&path).ok().and_then(|bytes| serde_json::from_slice::<CacheEntry>(&bytes).ok());
			match entry {
				Some(entry) if entry.expires_at > now && current.map_or(true, |fp| entry.key.fingerprint == *fp) => {
					live.push((entry.expires_at, path));
				}
				_ => removed += usize::from(remove_file(&path)),
			}
		}
		let excess = live.len().saturating_sub(usize::try_from(self.max_entries).unwrap_or(usize::MAX));
		if excess > 0 {
			live.sort();
			for (_, path) in live.iter().take(excess) {
				removed += usize::from(remove_file(path));
			}
		}
		if removed > 0 {
			debug!(dir = %dir.display(), removed, "swept query cache");
		}
		removed
	}

	pub fn clear_all(&self) {
		self.memory.invalidate_all();
		if let Some(dir) = &self.dir {
			match fs::remove_dir_all(dir) {
				Ok(()) => debug!(dir = %dir.display(), "cleared query cache"),
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => warn!(dir = %dir.display(), error = %e, "could not clear query cache"),
			}
		}
	}

	/// Entries held in memory once pending evictions have run.
	pub fn len(&self) -> usize {
		self.memory.run_pending_tasks();
		usize::try_from(self.memory.entry_count()).unwrap_or(usize::MAX)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn path_for(&self, key: &CacheKey) -> Option<PathBuf> {
		self.dir.as_ref().map(|d| d.join(format!("{}.json", key.digest())))
	}

	fn read_disk(&self, key: &CacheKey) -> Option<CacheEntry> {
		let path = self.path_for(key)?;
		let bytes = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return None,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "could not read query cache entry");
				return None;
			}
		};
		match serde_json::from_slice::<CacheEntry>(&bytes) {
			Ok(entry) if entry.key == *key => Some(entry),
			Ok(_) => None,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "dropping corrupt query cache entry");
				self.remove_disk(key);
				None
			}
		}
	}

	fn write_disk(&self, entry: &CacheEntry) {
		let (Some(dir), Some(path)) = (self.dir.as_ref(), self.path_for(&entry.key)) else {
			return;
		};
		let written = fs::create_dir_all(dir)
			.and_then(|()| NamedTempFile::new_in(dir))
			.and_then(|mut tmp| {
				serde_json::to_writer(&mut tmp, entry)?;
				tmp.persist(&path).map_err(|e| e.error)?;
				Ok(())
			});
		if let Err(e) = written {
			warn!(path = %path.display(), error = %e, "could not write query cache entry");
		}
	}

	fn remove_disk(&self, key: &CacheKey) {
		if let Some(path) = self.path_for(key) {
			remove_file(&path);
		}
	}
}

fn remove_file(path: &Path) -> bool {
	match fs::remove_file(path) {
		Ok(()) => true,
		Err(e) if e.kind() == ErrorKind::NotFound => false,
		Err(e) => {
			warn!(path = %path.display(), error = %e, "could not evict query cache entry");
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;
	use actiondex_core::error::Error;
	use actiondex_core::fingerprint::{CorpusIdentity, FingerprintConfig, VersionHasher};
	use actiondex_core::config::RetrievalConfig;

	fn fingerprint(tag: &str) -> Fingerprint {
		let config = RetrievalConfig::default();
		VersionHasher::compute(&CorpusIdentity::VersionTag(tag.into()), &FingerprintConfig::new(&config, "hash:xxh64:d64"))
	}

	fn key(q: &str) -> CacheKey {
		CacheKey::new(fingerprint("v1"), q, 5)
	}

	fn result(chunk_id: u32) -> SearchResult {
		SearchResult { content: format!("chunk {chunk_id}"), source_name: "guide.txt".into(), score: 0.9, chunk_id }
	}

	fn files(root: &Path) -> usize {
		fs::read_dir(root.join(CACHE_DIR)).map(|d| d.flatten().count()).unwrap_or(0)
	}

	#[test]
	fn computes_once_then_hits() {
		let tmp = tempfile::tempdir().unwrap();
		let cache = QueryCache::new(tmp.path(), Duration::from_secs(3600));
		let calls = Cell::new(0);
		let compute = || {
			calls.set(calls.get() + 1);
			Ok(vec![result(1), result(2)])
		};
		let first = cache.get_or_compute(&key("apply leave"), compute).unwrap();
		let second = cache.get_or_compute(&key("apply leave"), compute).unwrap();
		assert_eq!(first, second);
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn expired_entries_are_misses() {
		let cache = QueryCache::in_memory(Duration::from_millis(1), 16);
		cache.put(&key("q"), &[result(1)]);
		std::thread::sleep(Duration::from_millis(10));
		assert!(cache.get(&key("q")).is_none());
		assert!(cache.is_empty(), "expired entry is evicted");
	}

	#[test]
	fn expired_entries_leave_memory_without_being_read_again() {
		let cache = QueryCache::in_memory(Duration::from_millis(1), 10_000);
		for i in 0..200 {
			cache.put(&key(&format!("query {i}")), &[result(i)]);
		}
		std::thread::sleep(Duration::from_millis(20));
		cache.put(&key("latest"), &[result(0)]);
		assert!(cache.len() <= 1, "{} entries held", cache.len());
	}

	#[test]
	fn memory_tier_is_bounded() {
		let cache = QueryCache::in_memory(Duration::from_secs(60), 10);
		for i in 0..100 {
			cache.put(&key(&format!("query {i}")), &[result(i)]);
		}
		assert!(cache.len() <= 10, "{} entries held", cache.len());
	}

	#[test]
	fn errors_are_not_cached() {
		let cache = QueryCache::in_memory(Duration::from_secs(60), 16);
		let err = cache.get_or_compute(&key("q"), || Err(Error::Search("boom".into())));
		assert!(err.is_err());
		assert!(cache.get(&key("q")).is_none());
	}

	#[test]
	fn disk_tier_survives_a_new_instance() {
		let tmp = tempfile::tempdir().unwrap();
		QueryCache::new(tmp.path(), Duration::from_secs(60)).put(&key("payslip"), &[result(3)]);
		let fresh = QueryCache::new(tmp.path(), Duration::from_secs(60));
		assert_eq!(fresh.get(&key("payslip")), Some(vec![result(3)]));
		fresh.clear_all();
		assert!(QueryCache::new(tmp.path(), Duration::from_secs(60)).get(&key("payslip")).is_none());
	}

	#[test]
	fn other_fingerprints_are_dropped_from_both_tiers() {
		let tmp = tempfile::tempdir().unwrap();
		let cache = QueryCache::new(tmp.path(), Duration::from_secs(60));
		let old = CacheKey::new(fingerprint("v1"), "apply leave", 5);
		let current = CacheKey::new(fingerprint("v2"), "apply leave", 5);
		cache.put(&old, &[result(1)]);
		cache.put(&CacheKey::new(fingerprint("v1"), "payslip", 5), &[result(2)]);
		cache.put(&current, &[result(3)]);
		assert_eq!(files(tmp.path()), 3);

		cache.retain_fingerprint(&current.fingerprint);
		assert_eq!(files(tmp.path()), 1);
		assert!(cache.get(&old).is_none());
		assert_eq!(cache.get(&current), Some(vec![result(3)]));
	}

	#[test]
	fn sweep_bounds_the_disk_tier() {
		let tmp = tempfile::tempdir().unwrap();
		let cache = QueryCache::with_capacity(tmp.path(), Duration::from_secs(60), 3);
		for i in 0..10 {
			cache.put(&key(&format!("query {i}")), &[result(i)]);
		}
		assert_eq!(cache.sweep(None), 7);
		assert_eq!(files(tmp.path()), 3);
	}

	#[test]
	fn sweep_removes_expired_files() {
		let tmp = tempfile::tempdir().unwrap();
		let cache = QueryCache::new(tmp.path(), Duration::from_millis(1));
		cache.put(&key("q"), &[result(1)]);
		std::thread::sleep(Duration::from_millis(10));
		assert_eq!(cache.sweep(None), 1);
		assert_eq!(files(tmp.path()), 0);
	}

	#[test]
	fn keys_differ_by_every_field() {
		let base = key("q");
		assert_ne!(base.digest(), CacheKey { top_k: 6, ..base.clone() }.digest());
		assert_ne!(base.digest(), key("q2").digest());
		assert_ne!(base.digest(), CacheKey::new(fingerprint("v2"), "q", 5).digest());
		assert_eq!(base.digest().len(), 64);
	}
}
