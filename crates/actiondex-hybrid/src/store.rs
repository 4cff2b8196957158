//! On-disk index bundles keyed by fingerprint.
//!
//! ```text
//! <root>/index/
//!     ACTIVE                    name of the active bundle directory
//!     <fp16>-<built_at_ms>/
//!         dense/                LanceDB database, table "chunk_vectors"
//!         bundle.json           schema tag, fingerprint, built_at, postings, chunks
//! ```
//!
//! A bundle is staged in a hidden directory, renamed into place and only then
//! published by rewriting `ACTIVE` through a temp file and rename. Readers
//! follow `ACTIVE`, so they see the old bundle or the new one, never a half.
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use actiondex_core::error::{Error, Result};
use actiondex_core::fingerprint::{Fingerprint, SCHEMA_TAG};
use actiondex_core::types::Chunk;
use actiondex_text::SparseIndex;
use actiondex_vector::artifact::{read_vectors, write_vectors};

use crate::bundle::IndexBundle;

pub const ACTIVE_FILE: &str = "ACTIVE";
pub const MANIFEST_FILE: &str = "bundle.json";
pub const DENSE_DIR: &str = "dense";
pub const STAGING_PREFIX: &str = ".staging-";

#[derive(Serialize, Deserialize)]
struct Manifest {
	schema: String,
	fingerprint: Fingerprint,
	built_at: DateTime<Utc>,
	dim: usize,
	sparse: SparseIndex,
	chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
	dir: PathBuf,
	ttl: Duration,
}

impl IndexStore {
	pub fn new(root: &Path, ttl: Duration) -> Self {
		Self { dir: root.join("index"), ttl }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Directory `ACTIVE` points at, if any.
	pub fn active_dir(&self) -> Result<Option<PathBuf>> {
		let pointer = self.dir.join(ACTIVE_FILE);
		let name = match fs::read_to_string(&pointer) {
			Ok(name) => name,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(Error::persistence("reading ACTIVE pointer", e)),
		};
		let name = name.trim();
		if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
			return Err(Error::Persistence(format!("invalid ACTIVE pointer '{name}'")));
		}
		Ok(Some(self.dir.join(name)))
	}

	/// The persisted bundle for `fingerprint`, or `None` when there is none,
	/// it has expired, or it was built for another schema or fingerprint.
	pub async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<IndexBundle>> {
		let Some(bundle_dir) = self.active_dir()? else {
			debug!(dir = %self.dir.display(), "no persisted index");
			return Ok(None);
		};
		let manifest_path = bundle_dir.join(MANIFEST_FILE);
		let modified = match fs::metadata(&manifest_path).and_then(|m| m.modified()) {
			Ok(t) => t,
			Err(e) if e.kind() == ErrorKind::NotFound => {
				warn!(dir = %bundle_dir.display(), "active index bundle is missing its manifest");
				return Ok(None);
			}
			Err(e) => return Err(Error::persistence("reading manifest metadata", e)),
		};
		let age = SystemTime::now().duration_since(modified).unwrap_or_default();
		if age > self.ttl {
			info!(age_secs = age.as_secs(), ttl_secs = self.ttl.as_secs(), "persisted index expired");
			return Ok(None);
		}

		let bytes = fs::read(&manifest_path).map_err(|e| Error::persistence("reading manifest", e))?;
		let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| Error::persistence("parsing manifest", e))?;
		if manifest.schema != SCHEMA_TAG {
			info!(found = %manifest.schema, expected = SCHEMA_TAG, "persisted index has another schema");
			return Ok(None);
		}
		if manifest.fingerprint != *fingerprint {
			info!(found = %manifest.fingerprint.short(), expected = %fingerprint.short(), "persisted index is stale");
			return Ok(None);
		}

		let dense = read_vectors(&bundle_dir.join(DENSE_DIR)).await.map_err(|e| Error::persistence("reading dense artifact", format!("{e:#}")))?;
		if dense.dim() != manifest.dim || dense.len() != manifest.chunks.len() || manifest.sparse.len() != manifest.chunks.len() {
			return Err(Error::Persistence(format!(
				"bundle {} is inconsistent: {} chunks, {} vectors of dim {} (expected {})",
				bundle_dir.display(),
				manifest.chunks.len(),
				dense.len(),
				dense.dim(),
				manifest.dim
			)));
		}
		info!(fingerprint = %fingerprint.short(), chunks = manifest.chunks.len(), "loaded persisted index");
		Ok(Some(IndexBundle {
			sparse: manifest.sparse,
			dense,
			chunks: manifest.chunks,
			fingerprint: manifest.fingerprint,
			built_at: manifest.built_at,
		}))
	}

	/// Persist `bundle`, make it the active one and prune older bundles along
	/// with staging dirs older than the TTL.
	pub async fn save(&self, bundle: &IndexBundle) -> Result<PathBuf> {
		fs::create_dir_all(&self.dir).map_err(|e| Error::persistence("creating index dir", e))?;
		let name = format!("{}-{}", bundle.fingerprint.short(), bundle.built_at.timestamp_millis());

		let staging = tempfile::Builder::new()
			.prefix(STAGING_PREFIX)
			.tempdir_in(&self.dir)
			.map_err(|e| Error::persistence("creating staging dir", e))?;
		write_vectors(&staging.path().join(DENSE_DIR), &bundle.dense)
			.await
			.map_err(|e| Error::persistence("writing dense artifact", format!("{e:#}")))?;
		let manifest = Manifest {
			schema: SCHEMA_TAG.to_string(),
			fingerprint: bundle.fingerprint.clone(),
			built_at: bundle.built_at,
			dim: bundle.dense.dim(),
			sparse: bundle.sparse.clone(),
			chunks: bundle.chunks.clone(),
		};
		write_manifest(&staging.path().join(MANIFEST_FILE), &manifest)?;

		let final_dir = self.dir.join(&name);
		if final_dir.exists() {
			fs::remove_dir_all(&final_dir).map_err(|e| Error::persistence("replacing bundle dir", e))?;
		}
		// The TempDir guard finds nothing left to delete after the rename.
		fs::rename(staging.path(), &final_dir).map_err(|e| Error::persistence("publishing bundle dir", e))?;
		self.flip_active(&name)?;
		self.prune(&name);
		info!(dir = %final_dir.display(), chunks = bundle.chunks.len(), "persisted index");
		Ok(final_dir)
	}

	/// Remove every persisted bundle and the pointer.
	pub fn clear(&self) -> Result<()> {
		match fs::remove_dir_all(&self.dir) {
			Ok(()) => {
				info!(dir = %self.dir.display(), "cleared persisted indexes");
				Ok(())
			}
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(Error::persistence("clearing index dir", e)),
		}
	}

	fn flip_active(&self, name: &str) -> Result<()> {
		let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| Error::persistence("creating ACTIVE temp file", e))?;
		tmp.write_all(name.as_bytes())
			.and_then(|()| tmp.as_file().sync_all())
			.map_err(|e| Error::persistence("writing ACTIVE temp file", e))?;
		tmp.persist(self.dir.join(ACTIVE_FILE)).map_err(|e| Error::persistence("flipping ACTIVE pointer", e.error))?;
		Ok(())
	}

	fn prune(&self, keep: &str) {
		let entries = match fs::read_dir(&self.dir) {
			Ok(entries) => entries,
			Err(e) => {
				warn!(error = %e, "could not list index dir for pruning");
				return;
			}
		};
		for entry in entries.flatten() {
			let name = entry.file_name().to_string_lossy().to_string();
			if name == keep || !entry.path().is_dir() {
				continue;
			}
			// Staging dirs of saves still running elsewhere are young; old ones
			// were left behind by a crash.
			if name.starts_with('.') && !(name.starts_with(STAGING_PREFIX) && self.is_stale(&entry.path())) {
				continue;
			}
			match fs::remove_dir_all(entry.path()) {
				Ok(()) => debug!(bundle = %name, "pruned old index bundle"),
				Err(e) => warn!(bundle = %name, error = %e, "could not prune old index bundle"),
			}
		}
	}

	fn is_stale(&self, path: &Path) -> bool {
		fs::metadata(path)
			.and_then(|m| m.modified())
			.map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default() > self.ttl)
			.unwrap_or(false)
	}
}

fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
	let file = fs::File::create(path).map_err(|e| Error::persistence("creating manifest", e))?;
	let mut writer = BufWriter::new(file);
	serde_json::to_writer(&mut writer, manifest).map_err(|e| Error::persistence("serialising manifest", e))?;
	writer.flush().map_err(|e| Error::persistence("writing manifest", e))?;
	writer.get_ref().sync_all().map_err(|e| Error::persistence("syncing manifest", e))?;
	Ok(())
}
