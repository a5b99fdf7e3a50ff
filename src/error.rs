//! Error taxonomy shared by the extraction and refactoring phases.
//!
//! Per-file and per-block errors are isolated and reported in aggregate;
//! only tree-level failures abort a whole run (see [`ScanError::is_fatal`]).

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for every stage of the pipeline.
#[derive(Debug, Error)]
pub enum ScanError {
    /// File could not be read or decoded. The file is skipped.
    #[error("cannot read {path}: {reason}")]
    Read {
        path: PathBuf,
        reason: String,
    },

    /// File exceeds the configured size ceiling. The file is skipped.
    #[error("{path} is {size} bytes (ceiling {max} bytes)")]
    TooLarge {
        path: PathBuf,
        size: u64,
        max: u64,
    },

    /// A provenance id that was not produced by the codec.
    #[error("malformed provenance id {id:?}: {reason}")]
    MalformedProvenance {
        id: String,
        reason: String,
    },

    /// Destination content no longer matches the recorded coordinates.
    #[error("line mismatch for {id}: {detail}")]
    LineMismatch {
        id: String,
        detail: String,
    },

    /// Cloning the source tree into the destination failed.
    #[error("failed to copy tree at {path}: {source}")]
    TreeCopyFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a refactored file failed after the copy was committed.
    #[error("failed to write {path}: {source}")]
    PartialWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("destination {0} exists and is not empty")]
    DestinationNotEmpty(PathBuf),

    #[error("destination {destination} lies inside source root {root}")]
    DestinationInsideSource {
        root: PathBuf,
        destination: PathBuf,
    },

    /// A persisted record line could not be parsed.
    #[error("{path}:{line}: {reason}")]
    Records {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid configuration {path}: {reason}")]
    Config {
        path: PathBuf,
        reason: String,
    },

    #[error("markup parser unavailable: {0}")]
    Parser(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedProvenance {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Tree-level failures abort the entire operation; everything else is
    /// isolated to one file or one block.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TreeCopyFailure { .. }
                | Self::PartialWriteFailure { .. }
                | Self::DestinationNotEmpty(_)
                | Self::DestinationInsideSource { .. }
                | Self::Config { .. }
                | Self::Parser(_)
                | Self::Io(_)
        )
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_split() {
        assert!(!ScanError::read("a.html", "denied").is_fatal());
        assert!(!ScanError::malformed("x", "no delimiter").is_fatal());
        assert!(!ScanError::LineMismatch {
            id: "x".into(),
            detail: "moved".into()
        }
        .is_fatal());
        assert!(ScanError::DestinationNotEmpty(PathBuf::from("out")).is_fatal());
        assert!(ScanError::PartialWriteFailure {
            path: PathBuf::from("out/a.html"),
            source: std::io::Error::other("disk full"),
        }
        .is_fatal());
    }

    #[test]
    fn test_messages_name_the_path() {
        let err = ScanError::TooLarge {
            path: PathBuf::from("big.html"),
            size: 20,
            max: 10,
        };
        assert_eq!(err.to_string(), "big.html is 20 bytes (ceiling 10 bytes)");
    }
}
