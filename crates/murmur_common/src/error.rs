use thiserror::Error;

use crate::types::TxnId;

/// Convenience alias for `Result<T, MurmurError>`.
pub type MurmurResult<T> = Result<T, MurmurError>;

/// Error classification for retry decisions at the client boundary.
///
/// - `UserError`: malformed input; retrying unchanged will fail again
/// - `Retryable`: SSI conflict; the caller should retry the whole
///   transaction against a fresh snapshot
/// - `Transient`: peer/network trouble; retrying later may succeed
/// - `InternalBug`: should never happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
///
/// Absent keys are deliberately not represented here: a missing or
/// deleted key is an `Option::None` at the storage API boundary, not
/// an error.
#[derive(Error, Debug)]
pub enum MurmurError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage layer errors. These bubble to the immediate caller
/// synchronously and are never downgraded.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Checksum mismatch: entry bytes are corrupted")]
    ChecksumMismatch,

    #[error("Entry truncated: declared block extends past the buffer")]
    Truncated,

    #[error("Table overflow: insert of {size} bytes would exceed max table size {max}")]
    TableOverflow { size: usize, max: usize },

    #[error("Decompression failed: {0}")]
    Decompression(String),
}

/// Transaction layer errors.
#[derive(Error, Debug)]
pub enum TxnError {
    #[error("Transaction {0} aborted: read set invalidated by a later commit")]
    Conflict(TxnId),

    #[error("Commit timestamps exhausted")]
    TimestampExhausted,

    #[error("Transaction {0} already finished")]
    AlreadyFinished(TxnId),
}

/// Cluster / membership errors. Contained within the membership
/// component: a failed peer RPC makes the peer a suspect, it never
/// escapes to router callers.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

impl MurmurError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MurmurError::InvalidRequest(_) => ErrorKind::UserError,
            MurmurError::Txn(TxnError::Conflict(_)) => ErrorKind::Retryable,
            MurmurError::Cluster(_) => ErrorKind::Transient,
            MurmurError::Storage(StorageError::TableOverflow { .. }) => ErrorKind::Transient,
            MurmurError::Storage(_) => ErrorKind::InternalBug,
            MurmurError::Txn(_) => ErrorKind::InternalBug,
            MurmurError::Internal(_) => ErrorKind::InternalBug,
        }
    }

    /// Returns true if the caller should retry the whole operation
    /// against a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }
}
