//! The upstream collaborator the status publisher polls.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::SourceError;
use crate::machine::StatusSnapshot;

/// Produces a fresh snapshot of monitored machines on every call.
///
/// Implementations must not cache: each call reflects the store at the time
/// of the call.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current snapshot.
    async fn fetch(&self) -> Result<StatusSnapshot, SourceError>;
}

#[async_trait]
impl<T: StatusSource + ?Sized> StatusSource for Arc<T> {
    async fn fetch(&self) -> Result<StatusSnapshot, SourceError> {
        (**self).fetch().await
    }
}
