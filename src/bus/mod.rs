//! Event Bus — pub/sub + durable consumer-group streams + latest-value KV,
//! over a pluggable backend.
//!
//! `RedisBus` is the production backend; `InMemoryBus` is used in tests and
//! anywhere a Redis deployment isn't available, swapped in behind the same
//! trait object.

mod memory;
mod redis_bus;

pub use memory::InMemoryBus;
pub use redis_bus::RedisBus;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Fields of a single stream entry, as a flat string map (mirrors a Redis
/// stream entry's field/value pairs).
pub type Fields = HashMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// One delivered stream entry: its id plus its fields.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Fields,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append-only publish. Returns the backend-assigned monotonic id.
    async fn publish_stream(&self, stream: &str, fields: Fields) -> Result<String, BusError>;

    /// Ensure the consumer group exists (`mkstream=true`); a `BUSYGROUP`
    /// response is treated as success.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError>;

    /// Read up to `max` entries for `consumer` in `group`, blocking up to
    /// `block` for new data.
    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BusError>;

    /// Acknowledge an entry. Safe to call twice.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError>;

    /// Best-effort, unpersisted broadcast.
    async fn publish_pubsub(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Subscribe to a channel; delivery to each subscriber is independent.
    /// Returns a receiver that yields payloads until the subscription is
    /// dropped or the backend is shut down.
    async fn subscribe_pubsub(
        &self,
        channel: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<String>, BusError>;

    /// Last-writer-wins value with optional TTL.
    async fn set_latest(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BusError>;

    async fn get_latest(&self, key: &str) -> Result<Option<String>, BusError>;

    /// Push a value onto a bounded list, trimming to `cap` most recent.
    async fn push_bounded_list(&self, key: &str, value: &str, cap: usize) -> Result<(), BusError>;

    /// Read up to `limit` most-recent entries from a bounded list, newest first.
    async fn read_bounded_list(&self, key: &str, limit: usize) -> Result<Vec<String>, BusError>;
}
