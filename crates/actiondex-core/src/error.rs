use thiserror::Error;

/// Failure classes of the retrieval core.
///
/// Each variant carries its own recovery rule: `Config` and `Embedding` are
/// returned to the build caller, `CorpusEmpty` leaves the retriever unbuilt,
/// `Persistence` falls back to a rebuild (load) or is logged (save), and
/// `Search` is turned into a "no relevant result" outcome.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No source chunks to index")]
    CorpusEmpty,

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Search failed: {0}")]
    Search(String),
}

impl Error {
    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Persistence(format!("{context}: {err}"))
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
