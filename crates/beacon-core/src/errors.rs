//! Error types shared across crates.

use std::time::Duration;

/// Why a status snapshot could not be produced.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SourceError {
    /// The backing store could not be reached or queried.
    #[error("status source unavailable: {0}")]
    Unavailable(String),
    /// A stored row could not be decoded into a record.
    #[error("malformed status record: {0}")]
    Malformed(String),
    /// The fetch did not finish within the allotted time.
    #[error("status fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl SourceError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
            Self::Timeout(_) => "timeout",
        }
    }
}
