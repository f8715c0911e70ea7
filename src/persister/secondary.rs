//! The optional second relational store.
//! Resolved as non-blocking and best-effort: a failure here is logged and
//! does not affect acking or the primary SQLite write, which stays
//! authoritative.

use async_trait::async_trait;

use super::PersistError;
use crate::types::ConsolidatedRecord;

#[async_trait]
pub trait SecondaryStore: Send + Sync {
    async fn upsert(&self, record: &ConsolidatedRecord) -> Result<(), PersistError>;
}

/// No secondary store configured. The default.
pub struct NoopSecondaryStore;

#[async_trait]
impl SecondaryStore for NoopSecondaryStore {
    async fn upsert(&self, _record: &ConsolidatedRecord) -> Result<(), PersistError> {
        Ok(())
    }
}
