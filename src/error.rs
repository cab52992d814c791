use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a run before anything is deleted.
#[derive(Debug, Error)]
pub enum ReapError {
    #[error("root directory not found: {}", path.display())]
    RootNotFound { path: PathBuf },

    #[error("threshold must be greater than zero")]
    InvalidThreshold,

    #[error("failed to list {}: {source}", path.display())]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryErrorKind {
    Metadata,
    Remove,
}

impl fmt::Display for EntryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryErrorKind::Metadata => f.write_str("read metadata"),
            EntryErrorKind::Remove => f.write_str("remove"),
        }
    }
}

/// A failure confined to one candidate. Never aborts the run.
#[derive(Debug, Error)]
#[error("failed to {kind} {name}: {source}")]
pub struct EntryError {
    pub name: String,
    pub kind: EntryErrorKind,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdParseError {
    #[error("invalid threshold: expected a number, got {0:?}")]
    InvalidNumber(String),

    #[error("invalid threshold unit {0:?}; supported units: s, m, h, d")]
    InvalidUnit(String),

    #[error("threshold {0:?} is too large")]
    Overflow(String),
}
