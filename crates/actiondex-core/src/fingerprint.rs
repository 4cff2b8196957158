//! Version fingerprints deciding whether a persisted index is still valid.
//!
//! The fingerprint is the only validity signal: document contents are never
//! compared. It covers the corpus identity, every setting that changes what
//! gets indexed or how it ranks, and [`SCHEMA_TAG`].
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;

/// Bump when chunking, tokenisation or the on-disk bundle layout changes.
pub const SCHEMA_TAG: &str = "actiondex-index-v1";

/// A file's path and modification time, the fallback corpus identity for
/// local documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Identity of the corpus as seen by the fetching layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusIdentity {
    /// Opaque version from remote storage (e.g. an ETag digest). Preferred.
    VersionTag(String),
    Files(Vec<FileStamp>),
}

impl CorpusIdentity {
    /// Stat the given paths. Paths that cannot be read are skipped.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        let stamps = paths
            .iter()
            .filter_map(|p| {
                let p = p.as_ref();
                let modified = std::fs::metadata(p).and_then(|m| m.modified()).ok()?;
                Some(FileStamp { path: p.to_path_buf(), modified })
            })
            .collect();
        Self::Files(stamps)
    }
}

/// Build settings folded into the fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintConfig<'a> {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
    pub embedder_id: &'a str,
}

impl<'a> FingerprintConfig<'a> {
    pub fn new(config: &RetrievalConfig, embedder_id: &'a str) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            bm25_weight: config.bm25_weight,
            vector_weight: config.vector_weight,
            embedder_id,
        }
    }
}

/// 64 lower-case hex digits. Deserialising anything else fails, so a
/// foreign or damaged manifest surfaces as a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(String);

pub const FINGERPRINT_LEN: usize = 64;

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading hex digits, enough to name directories and log lines.
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let well_formed = value.len() == FINGERPRINT_LEN && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if well_formed {
            Ok(Self(value))
        } else {
            Err(format!("not a fingerprint: {value:?}"))
        }
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct VersionHasher;

impl VersionHasher {
    /// Deterministic 64-hex-char fingerprint of corpus + config.
    pub fn compute(identity: &CorpusIdentity, config: &FingerprintConfig<'_>) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        field(&mut hasher, SCHEMA_TAG.as_bytes());
        match identity {
            CorpusIdentity::VersionTag(tag) => {
                field(&mut hasher, b"tag");
                field(&mut hasher, tag.as_bytes());
            }
            CorpusIdentity::Files(stamps) => {
                field(&mut hasher, b"files");
                let mut sorted: Vec<&FileStamp> = stamps.iter().collect();
                sorted.sort_by(|a, b| a.path.cmp(&b.path).then(a.modified.cmp(&b.modified)));
                for stamp in sorted {
                    field(&mut hasher, stamp.path.to_string_lossy().as_bytes());
                    field(&mut hasher, &mtime_nanos(stamp.modified).to_le_bytes());
                }
            }
        }
        field(&mut hasher, &(config.chunk_size as u64).to_le_bytes());
        field(&mut hasher, &(config.chunk_overlap as u64).to_le_bytes());
        field(&mut hasher, &config.bm25_weight.to_bits().to_le_bytes());
        field(&mut hasher, &config.vector_weight.to_bits().to_le_bytes());
        field(&mut hasher, config.embedder_id.as_bytes());
        Fingerprint(hasher.finalize().to_hex().to_string())
    }
}

// Length-prefix every field so adjacent fields cannot run into each other.
fn field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn mtime_nanos(t: SystemTime) -> i128 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg() -> FingerprintConfig<'static> {
        FingerprintConfig { chunk_size: 600, chunk_overlap: 150, bm25_weight: 0.6, vector_weight: 0.4, embedder_id: "hash:d64" }
    }

    fn tag(t: &str) -> CorpusIdentity {
        CorpusIdentity::VersionTag(t.to_string())
    }

    #[test]
    fn same_inputs_same_fingerprint() {
        let a = VersionHasher::compute(&tag("etag-1"), &cfg());
        let b = VersionHasher::compute(&tag("etag-1"), &cfg());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 16);
    }

    #[test]
    fn every_config_field_changes_the_fingerprint() {
        let base = VersionHasher::compute(&tag("v"), &cfg());
        let variants = [
            FingerprintConfig { chunk_size: 601, ..cfg() },
            FingerprintConfig { chunk_overlap: 149, ..cfg() },
            FingerprintConfig { bm25_weight: 0.5, ..cfg() },
            FingerprintConfig { vector_weight: 0.5, ..cfg() },
            FingerprintConfig { embedder_id: "bert:d384", ..cfg() },
        ];
        for v in &variants {
            assert_ne!(VersionHasher::compute(&tag("v"), v), base, "{v:?}");
        }
        assert_ne!(VersionHasher::compute(&tag("w"), &cfg()), base);
    }

    #[test]
    fn file_order_does_not_matter() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let a = FileStamp { path: "/docs/a.txt".into(), modified: t0 };
        let b = FileStamp { path: "/docs/b.txt".into(), modified: t0 + Duration::from_millis(5) };
        let fwd = CorpusIdentity::Files(vec![a.clone(), b.clone()]);
        let rev = CorpusIdentity::Files(vec![b, a]);
        assert_eq!(VersionHasher::compute(&fwd, &cfg()), VersionHasher::compute(&rev, &cfg()));
    }

    #[test]
    fn touching_a_file_changes_the_fingerprint() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let before = CorpusIdentity::Files(vec![FileStamp { path: "/docs/a.txt".into(), modified: t0 }]);
        let after = CorpusIdentity::Files(vec![FileStamp { path: "/docs/a.txt".into(), modified: t0 + Duration::from_nanos(1) }]);
        assert_ne!(VersionHasher::compute(&before, &cfg()), VersionHasher::compute(&after, &cfg()));
    }

    #[test]
    fn tag_and_file_identities_do_not_collide() {
        let files = CorpusIdentity::Files(vec![]);
        assert_ne!(VersionHasher::compute(&files, &cfg()), VersionHasher::compute(&tag(""), &cfg()));
    }

    #[test]
    fn only_hex_digests_deserialise() {
        let fp = VersionHasher::compute(&tag("v"), &cfg());
        let json = serde_json::to_string(&fp).expect("serialise");
        assert_eq!(serde_json::from_str::<Fingerprint>(&json).expect("round trip"), fp);
        let upper = format!("\"{}\"", fp.as_str().to_uppercase());
        for bad in ["\"\"", "\"€€€€€€\"", "\"abc123\"", upper.as_str()] {
            assert!(serde_json::from_str::<Fingerprint>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn missing_paths_are_skipped() {
        let tmp = tempfile::tempdir().expect("tmp");
        let present = tmp.path().join("guide.txt");
        std::fs::write(&present, "x").expect("write");
        let missing = tmp.path().join("gone.txt");
        match CorpusIdentity::from_paths(&[present.clone(), missing]) {
            CorpusIdentity::Files(stamps) => {
                assert_eq!(stamps.len(), 1);
                assert_eq!(stamps[0].path, present);
            }
            CorpusIdentity::VersionTag(_) => panic!("expected file stamps"),
        }
    }
}
