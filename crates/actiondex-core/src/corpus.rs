//! Corpus assembly: decoded text plus the identity used for fingerprinting.
//!
//! Remote fetching and binary decoding happen elsewhere. This module only
//! discovers already-decoded text files on disk and cleans template
//! placeholders out of their content.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::fingerprint::CorpusIdentity;
use crate::types::Document;

/// File-name keywords that mark the master action document.
pub const MASTER_KEYWORDS: [&str; 4] = ["knowledge", "action", "master", "guide"];

const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

#[derive(Debug, Clone)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub identity: CorpusIdentity,
}

impl Corpus {
    pub fn new(documents: Vec<Document>, identity: CorpusIdentity) -> Self {
        Self { documents, identity }
    }

    /// Build from `(source_name, decoded_text)` pairs as handed over by the
    /// fetching layer.
    pub fn from_texts<I, N, T>(texts: I, identity: CorpusIdentity) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: AsRef<str>,
    {
        let documents = texts
            .into_iter()
            .map(|(name, text)| Document::new(name, sanitize_content(text.as_ref())))
            .collect();
        Self { documents, identity }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.iter().all(|d| d.raw_text.trim().is_empty())
    }

    /// Load the master document(s) from `dir`, identified by file stamps.
    pub fn load_directory(dir: &Path) -> Self {
        let paths = discover_documents(dir);
        let mut documents = Vec::with_capacity(paths.len());
        for path in &paths {
            match read_text(path) {
                Ok(text) => {
                    let name = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string());
                    info!(document = %name, bytes = text.len(), "loaded document");
                    documents.push(Document::new(name, sanitize_content(&text)).with_path(path.display().to_string()));
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable document"),
            }
        }
        Self { documents, identity: CorpusIdentity::from_paths(&paths) }
    }
}

/// Text files under `dir`, sorted. Files whose name carries one of
/// [`MASTER_KEYWORDS`] win; otherwise every text file is used.
pub fn discover_documents(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
        })
        .collect();
    files.sort();
    let masters: Vec<PathBuf> = files.iter().filter(|p| is_master_document(p)).cloned().collect();
    if masters.is_empty() {
        files
    } else {
        masters
    }
}

pub fn is_master_document(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .is_some_and(|name| MASTER_KEYWORDS.iter().any(|kw| name.contains(kw)))
}

fn read_text(path: &Path) -> std::io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&std::fs::read(path)?).to_string()),
    }
}

fn placeholder_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?i)\[insert name and job title\]", "HR Representative"),
            (r"(?i)\[insert job title\]", "HR Representative"),
            (r"(?i)\[the Company\]", "the company"),
            (r"(?i)\[Company Name\]", "the company"),
            (r"(?i)\[Employee\]", "employee"),
            (r"(?i)\[INSERT LOGO HERE\]", ""),
            // Any other template slot left unfilled.
            (r"(?i)\[\s*insert[^\]]*\]", "the appropriate details"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Replace template placeholders left in the source documents.
pub fn sanitize_content(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in placeholder_rules() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}
