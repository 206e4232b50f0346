use async_trait::async_trait;

use crate::error::PersistenceError;

/// Advisory bookkeeping of room membership in an external store.
///
/// Called off the relay path; failures are logged by the caller and never
/// affect live routing.
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn record_joined(&self, room: &str, identity: &str) -> Result<(), PersistenceError>;

    async fn record_left(&self, room: &str, identity: &str) -> Result<(), PersistenceError>;
}

/// Store that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl ParticipantStore for NullStore {
    async fn record_joined(&self, _room: &str, _identity: &str) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn record_left(&self, _room: &str, _identity: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
}
