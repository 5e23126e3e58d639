use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong packing a tree or reading a packed stream.
#[derive(Debug, Error)]
pub enum Error {
    // Stream format problems.
    #[error("bad magic in header record")]
    BadMagic,
    #[error("truncated header record")]
    TruncatedRecord,
    #[error("root entry is not a directory")]
    RootNotDirectory,
    #[error("directory has too many entries: {0}")]
    OversizeDirectory(u64),
    #[error("duplicate name {0:?} in directory")]
    DuplicateName(String),

    // Lookup and handle misuse.
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("entry does not exist")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("seek to negative position")]
    NegativeSeek,

    // Writer caps.
    #[error("depth limit exceeded: {depth} > {max}")]
    DepthLimit { depth: u32, max: u32 },
    #[error("entry limit exceeded: more than {0} entries")]
    EntryLimit(u64),
    #[error("output size limit exceeded: {need} > {max} bytes")]
    SizeLimit { need: u64, max: u64 },

    /// Context wrapper: the path that failed, innermost cause inside.
    #[error("{path}: {source}")]
    Path { path: String, source: Box<Error> },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the innermost cause is a missing entry, however many
    /// path wrappers are stacked on top.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound => true,
            Error::Path { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    // Tag an error with the path it happened at. Already-tagged errors
    // keep their original (more precise) path.
    pub(crate) fn at(self, path: &str) -> Error {
        match self {
            err @ Error::Path { .. } => err,
            err => Error::Path {
                path: path.to_string(),
                source: Box::new(err),
            },
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(inner) => inner,
            err @ Error::NegativeSeek => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::other(other),
        }
    }
}
