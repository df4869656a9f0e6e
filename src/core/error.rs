use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the file mapping pipeline and the publishers that consume it.
///
/// Configuration mistakes (bindings, patterns, unknown sets) are never retried.
/// Transient filesystem failures and archive integrity failures are
/// [`recoverable`](FilesetError::is_recoverable) and go through the retry policy
/// of the archive publisher.
#[derive(Debug, Error)]
pub enum FilesetError {
    #[error("unresolved placeholder '{{{key}}}' in template '{template}'")]
    Binding { key: String, template: String },

    #[error("malformed template '{template}': {reason}")]
    MalformedTemplate { template: String, reason: String },

    #[error("unknown configuration key '{key}'")]
    UnknownKey { key: String },

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("file set '{name}' is not defined")]
    UnknownSet { name: String },

    #[error("file set '{name}' could not be loaded: {reason}")]
    InvalidSet { name: String, reason: String },

    #[error("destination {} leaves {}", .path.display(), .root.display())]
    EscapingDestination { path: PathBuf, root: PathBuf },

    #[error("found no files to publish at {}", .target.display())]
    NoFilesMatched { target: PathBuf },

    #[error("torrent {} has no hashable content", .target.display())]
    EmptyTorrent { target: PathBuf },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive {} is corrupted: {reason}", .path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("transaction failed and was rolled back: {reason}")]
    Transaction { reason: String },

    #[error("source control error: {0}")]
    SourceControl(#[from] git2::Error),
}

impl FilesetError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether a retry policy may try the failed operation again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Integrity { .. })
    }
}

pub type FilesetResult<T> = std::result::Result<T, FilesetError>;
