//! Redis-backed `EventBus`: streams + consumer groups for durability,
//! pub/sub for best-effort fanout, strings for latest-value keys, lists for
//! bounded recent-history keys.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use super::{BusError, EventBus, Fields, StreamEntry};

pub struct RedisBus {
    manager: ConnectionManager,
    client: redis::Client,
}

impl RedisBus {
    pub async fn connect(host: &str, port: u16) -> Result<Self, BusError> {
        let url = format!("redis://{host}:{port}/");
        let client = redis::Client::open(url.as_str())
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(Self { manager, client })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish_stream(&self, stream: &str, fields: Fields) -> Result<String, BusError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (k, v) in &fields {
            cmd.arg(k).arg(v);
        }
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // BUSYGROUP: the group already exists — a no-op, per spec.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::BackendUnavailable(e.to_string())),
        }
    }

    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.manager.clone();

        // Reclaim anything idle past CLAIM_MIN_IDLE_MS before reading new
        // entries — this drains the consumer's own PEL after a restart and
        // picks up entries abandoned by a consumer that died mid-processing.
        // Without this, only the never-delivered `>` id is ever read and
        // pending entries are redelivered to no one.
        let claimed: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(crate::config::CLAIM_MIN_IDLE_MS)
            .arg("0")
            .arg("COUNT")
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;

        if !claimed.claimed.is_empty() {
            return stream_ids_to_entries(claimed.claimed);
        }

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(block.as_millis() as i64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;

        let mut out = Vec::new();
        for key in reply.keys {
            out.extend(stream_ids_to_entries(key.ids)?);
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .xack(stream, group, &[id])
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn publish_pubsub(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn subscribe_pubsub(
        &self,
        channel: &str,
    ) -> Result<mpsc::Receiver<String>, BusError> {
        let client = self.client.clone();
        let channel = channel.to_string();
        let (tx, rx) = mpsc::channel(1024);

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;

        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn set_latest(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn get_latest(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(value)
    }

    async fn push_bounded_list(&self, key: &str, value: &str, cap: usize) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .lpush(key, value)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        let cap = cap.max(1) as isize;
        let _: () = conn
            .ltrim(key, 0, cap - 1)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn read_bounded_list(&self, key: &str, limit: usize) -> Result<Vec<String>, BusError> {
        let mut conn = self.manager.clone();
        let limit = limit.max(1) as isize;
        let values: Vec<String> = conn
            .lrange(key, 0, limit - 1)
            .await
            .map_err(|e| BusError::BackendUnavailable(e.to_string()))?;
        Ok(values)
    }
}

fn stream_ids_to_entries(ids: Vec<redis::streams::StreamId>) -> Result<Vec<StreamEntry>, BusError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let mut fields = Fields::new();
        for (field, value) in id.map {
            let value_str: String = redis::from_redis_value(&value)
                .map_err(|e| BusError::DecodeError(e.to_string()))?;
            fields.insert(field, value_str);
        }
        out.push(StreamEntry { id: id.id, fields });
    }
    Ok(out)
}
