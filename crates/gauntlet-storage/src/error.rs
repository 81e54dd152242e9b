use thiserror::Error;

/// Structured classification of storage failures.
///
/// This is the kind contract the sync engine dispatches on: `Conflict` and
/// `Duplicate` route to conflict resolution, everything else to the retry
/// policy. Remote providers must map their transport outcomes onto these
/// kinds; no message substring matching happens anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Remote reports contention on the record.
    Conflict,
    /// Remote reports the record already exists (unique violation).
    Duplicate,
    Unauthorized,
    /// Network failure or remote outage; the hybrid provider degrades to
    /// local-only on this kind.
    Unavailable,
    RateLimited,
    /// Persisted record failed schema validation on load.
    Corrupt,
    Other,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("local store error: {0}")]
    Local(String),

    #[error("remote store error ({kind:?}): {message}")]
    Remote {
        kind: StorageErrorKind,
        message: String,
    },

    #[error("record '{record_id}' in {table} failed validation and was quarantined")]
    CorruptState { table: String, record_id: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("sync retries exhausted for {table}/{record_id}")]
    ExhaustedRetries { table: String, record_id: String },

    #[error("provider is shut down")]
    ShutDown,
}

impl StorageError {
    pub fn remote(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        StorageError::Remote {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Remote { kind, .. } => *kind,
            StorageError::CorruptState { .. } => StorageErrorKind::Corrupt,
            StorageError::Local(_) | StorageError::Serialization(_) => StorageErrorKind::Other,
            StorageError::ExhaustedRetries { .. } => StorageErrorKind::Other,
            StorageError::ShutDown => StorageErrorKind::Unavailable,
        }
    }

    /// Whether the sync engine should hand this failure to conflict
    /// resolution instead of the retry policy.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.kind(),
            StorageErrorKind::Conflict | StorageErrorKind::Duplicate
        )
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind() == StorageErrorKind::Unavailable
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Local(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        StorageError::Local(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_connect() || err.is_timeout() {
            StorageErrorKind::Unavailable
        } else {
            StorageErrorKind::Other
        };
        StorageError::remote(kind, err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
