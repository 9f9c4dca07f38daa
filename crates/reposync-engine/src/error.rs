//! Error types for the synchronization engine.

use std::path::PathBuf;

use reposync_config::ConfigError;

/// Failures reported by a repository transport.
///
/// Every transport translates its native failures into one of these; the
/// engine never sees status codes or driver errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("deleted: {0}")]
    Deleted(String),

    #[error("ambiguous match: {0}")]
    AmbiguousMatch(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Only transient failures are eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Error types for synchronization operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("No object matches identifiers {identifiers:?}")]
    NotFound { identifiers: Vec<String> },

    #[error("Object has been deleted: {0}")]
    Deleted(String),

    #[error("Identifiers {identifiers:?} match more than one object: {candidates:?}")]
    AmbiguousMatch {
        identifiers: Vec<String>,
        candidates: Vec<String>,
    },

    #[error("Identity cache inconsistent: {0}")]
    CacheInconsistent(String),

    #[error("Unresolvable reference cycle among {} nodes: {}", nodes.len(), nodes.join(", "))]
    CycleUnresolved { nodes: Vec<String> },

    #[error("Invalid reference from {subject} to {reference}")]
    InvalidReference { subject: String, reference: String },

    #[error("Transport failed after {attempts} attempts: {message}")]
    TransientTransport { attempts: u32, message: String },

    #[error("Rejected by repository: {0}")]
    Rejected(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Required metadata missing for {0:?}")]
    MetadataMissing(PathBuf),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Per-node failures that an import logs and drops instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Rejected(_) | SyncError::InvalidReference { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(what) => SyncError::NotFound {
                identifiers: vec![what],
            },
            TransportError::Deleted(what) => SyncError::Deleted(what),
            TransportError::AmbiguousMatch(what) => SyncError::AmbiguousMatch {
                identifiers: vec![what],
                candidates: Vec::new(),
            },
            TransportError::Transient(message) => SyncError::TransientTransport {
                attempts: 1,
                message,
            },
            TransportError::Rejected(message) => SyncError::Rejected(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
