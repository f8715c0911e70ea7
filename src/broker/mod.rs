//! Realtime Broker: fans out Event Bus pub/sub traffic to WebSocket
//! subscribers. Reads only from pub/sub — persistence and realtime delivery
//! are independent paths onto the same underlying detections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::{CHANNEL_CONSOLIDATED_QUEUED, CHANNEL_SYSTEM_LOG, CHANNEL_TRAFFIC_EVENTS};
use crate::types::random_hex_id;

/// One fanned-out message, tagged by the channel it's headed for so the
/// WebSocket layer can frame it as `real_time_event` or `system_log`.
#[derive(Debug, Clone)]
pub enum BrokerMessage {
    RealTimeEvent(String),
    SystemLog(String),
}

#[derive(Default)]
pub struct BrokerCounters {
    pub messages_relayed: AtomicU64,
    pub messages_dropped_backpressure: AtomicU64,
    pub subscribers_connected: AtomicU64,
}

/// Each WebSocket connection gets a correlation_id and a receiver for the
/// broadcast fanout channel.
pub struct Subscription {
    pub correlation_id: String,
    pub receiver: broadcast::Receiver<BrokerMessage>,
}

pub struct RealtimeBroker {
    bus: Arc<dyn EventBus>,
    sender: broadcast::Sender<BrokerMessage>,
    counters: Arc<BrokerCounters>,
}

impl RealtimeBroker {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            bus,
            sender,
            counters: Arc::new(BrokerCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<BrokerCounters> {
        self.counters.clone()
    }

    /// A connection's handle into the fanout, with its own correlation_id
    /// assigned at connect time.
    pub fn subscribe(&self) -> Subscription {
        self.counters.subscribers_connected.fetch_add(1, Ordering::Relaxed);
        Subscription {
            correlation_id: random_hex_id(),
            receiver: self.sender.subscribe(),
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut events = match self.bus.subscribe_pubsub(CHANNEL_TRAFFIC_EVENTS).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "broker failed to subscribe to traffic_events");
                return;
            }
        };
        let mut consolidated = match self.bus.subscribe_pubsub(CHANNEL_CONSOLIDATED_QUEUED).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "broker failed to subscribe to consolidated_data_queued");
                return;
            }
        };
        let mut system_log = match self.bus.subscribe_pubsub(CHANNEL_SYSTEM_LOG).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "broker failed to subscribe to system_log");
                return;
            }
        };

        loop {
            tokio::select! {
                Some(payload) = events.recv() => {
                    let _ = self.sender.send(BrokerMessage::RealTimeEvent(payload));
                }
                Some(payload) = consolidated.recv() => {
                    let _ = self.sender.send(BrokerMessage::RealTimeEvent(payload));
                }
                Some(payload) = system_log.recv() => {
                    let _ = self.sender.send(BrokerMessage::SystemLog(payload));
                }
                _ = cancel.cancelled() => return,
                else => return,
            }
        }
    }
}
