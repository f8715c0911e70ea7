//! In-process backend for tests and minimal dev deployments. Not durable
//! across process restarts — data lives only as long as the `InMemoryBus`
//! value does — but implements the same consumer-group semantics
//! (redelivery of unacked entries) as the Redis backend, which is what the
//! restart-durability tests in `tests/` rely on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{BusError, EventBus, Fields, StreamEntry};

struct StreamState {
    /// Ordered by insertion; id is a monotonically increasing counter
    /// rendered as a string, mirroring Redis stream ids.
    entries: BTreeMap<u64, Fields>,
    next_id: u64,
    /// Per-group pending-entries-list: group name -> (id -> fields),
    /// plus the cursor of the highest id ever delivered to that group.
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    pending: BTreeMap<u64, Fields>,
    delivered_cursor: u64,
}

struct LatestValue {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamState>,
    latest: HashMap<String, LatestValue>,
    bounded_lists: HashMap<String, Vec<String>>,
}

/// In-memory event bus.
pub struct InMemoryBus {
    inner: Mutex<Inner>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("channels mutex poisoned");
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish_stream(&self, stream: &str, fields: Fields) -> Result<String, BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let state = inner.streams.entry(stream.to_string()).or_insert_with(|| StreamState {
            entries: BTreeMap::new(),
            next_id: 1,
            groups: HashMap::new(),
        });
        let id = state.next_id;
        state.next_id += 1;
        state.entries.insert(id, fields);
        Ok(id.to_string())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let state = inner.streams.entry(stream.to_string()).or_insert_with(|| StreamState {
            entries: BTreeMap::new(),
            next_id: 1,
            groups: HashMap::new(),
        });
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        max: usize,
        _block: Duration,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let Some(state) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let group_state = state.groups.entry(group.to_string()).or_default();

        // Redeliver anything still pending (simulates at-least-once
        // redelivery after a restart) before handing out new entries.
        let mut out: Vec<StreamEntry> = group_state
            .pending
            .iter()
            .take(max)
            .map(|(id, fields)| StreamEntry {
                id: id.to_string(),
                fields: fields.clone(),
            })
            .collect();

        if out.len() < max {
            let remaining = max - out.len();
            let new_entries: Vec<(u64, Fields)> = state
                .entries
                .range((group_state.delivered_cursor + 1)..)
                .take(remaining)
                .map(|(id, fields)| (*id, fields.clone()))
                .collect();
            for (id, fields) in new_entries {
                group_state.delivered_cursor = group_state.delivered_cursor.max(id);
                group_state.pending.insert(id, fields.clone());
                out.push(StreamEntry {
                    id: id.to_string(),
                    fields,
                });
            }
        }

        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        if let Some(state) = inner.streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                let id: u64 = id
                    .parse()
                    .map_err(|_| BusError::DecodeError(format!("bad stream id: {id}")))?;
                group_state.pending.remove(&id);
            }
        }
        Ok(())
    }

    async fn publish_pubsub(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let sender = self.channel(channel);
        // No subscribers is not an error: pub/sub is best-effort.
        let _ = sender.send(payload.to_string());
        Ok(())
    }

    async fn subscribe_pubsub(
        &self,
        channel: &str,
    ) -> Result<mpsc::Receiver<String>, BusError> {
        let mut rx = self.channel(channel).subscribe();
        let (tx, out_rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out_rx)
    }

    async fn set_latest(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        inner.latest.insert(
            key.to_string(),
            LatestValue {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn get_latest(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        if let Some(entry) = inner.latest.get(key) {
            if let Some(expires_at) = entry.expires_at {
                if Instant::now() >= expires_at {
                    inner.latest.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn push_bounded_list(&self, key: &str, value: &str, cap: usize) -> Result<(), BusError> {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        let list = inner.bounded_lists.entry(key.to_string()).or_default();
        list.insert(0, value.to_string());
        list.truncate(cap);
        Ok(())
    }

    async fn read_bounded_list(&self, key: &str, limit: usize) -> Result<Vec<String>, BusError> {
        let inner = self.inner.lock().expect("bus mutex poisoned");
        let out = inner
            .bounded_lists
            .get(key)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fields(speed: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("speed".to_string(), speed.to_string());
        f
    }

    #[tokio::test]
    async fn publish_then_consume_then_ack() {
        let bus = InMemoryBus::new();
        bus.ensure_group("s", "g").await.unwrap();
        let id = bus.publish_stream("s", fields("12.3")).await.unwrap();

        let entries = bus
            .consume_group("s", "g", "c1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);

        bus.ack("s", "g", &id).await.unwrap();
        let entries = bus
            .consume_group("s", "g", "c1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn unacked_entries_are_redelivered() {
        let bus = InMemoryBus::new();
        bus.ensure_group("s", "g").await.unwrap();
        bus.publish_stream("s", fields("1")).await.unwrap();
        bus.publish_stream("s", fields("2")).await.unwrap();

        let first = bus
            .consume_group("s", "g", "c1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        // Simulate a restart: a fresh consume_group call (new consumer
        // name) still sees the unacked entries, in original order.
        let redelivered = bus
            .consume_group("s", "g", "c2", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 2);
        assert_eq!(redelivered[0].id, first[0].id);
    }

    #[tokio::test]
    async fn latest_value_ttl_expires() {
        let bus = InMemoryBus::new();
        bus.set_latest("k", "v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.get_latest("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn bounded_list_trims() {
        let bus = InMemoryBus::new();
        for i in 0..5 {
            bus.push_bounded_list("k", &i.to_string(), 3).await.unwrap();
        }
        // newest-first, capped at 3
        let inner = bus.inner.lock().unwrap();
        assert_eq!(inner.bounded_lists.get("k").unwrap().len(), 3);
        drop(inner);

        let read = bus.read_bounded_list("k", 10).await.unwrap();
        assert_eq!(read, vec!["4", "3", "2"]);
    }
}
