//! Store error type.

/// Errors raised by the inventory store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error("database error: {0}")]
    Database(String),

    /// No live row matched.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded.
    #[error("malformed row: {0}")]
    Malformed(String),

    /// Filesystem error while preparing the database location.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for beacon_core::SourceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Malformed(msg) => Self::Malformed(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}
