//! WebSocket upgrade: relays the Realtime Broker's fanout as
//! `real_time_event`/`system_log` frames and answers `ping` with `pong`.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::AppState;
use crate::broker::BrokerMessage;
use crate::config::SUBSCRIBER_SEND_TIMEOUT_SECS;

#[derive(Serialize)]
#[serde(tag = "type")]
enum WsFrame<'a> {
    #[serde(rename = "real_time_event")]
    RealTimeEvent { payload: &'a str, correlation_id: &'a str },
    #[serde(rename = "system_log")]
    SystemLog { payload: &'a str, correlation_id: &'a str },
    #[serde(rename = "pong")]
    Pong,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut subscription = state.broker.subscribe();
    let correlation_id = subscription.correlation_id.clone();
    tracing::info!(correlation_id, "websocket client connected");

    let send_timeout = Duration::from_secs(SUBSCRIBER_SEND_TIMEOUT_SECS);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                        let frame = serde_json::to_string(&WsFrame::Pong).unwrap_or_default();
                        match send_with_timeout(&mut socket, frame, send_timeout).await {
                            SendOutcome::Closed => break,
                            SendOutcome::Sent | SendOutcome::Dropped => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            relayed = subscription.receiver.recv() => {
                let message = match relayed {
                    Ok(message) => message,
                    // A lagging subscriber loses the messages it fell behind
                    // on, not the connection — keep reading the fanout.
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let frame = match &message {
                    BrokerMessage::RealTimeEvent(payload) => serde_json::to_string(&WsFrame::RealTimeEvent {
                        payload,
                        correlation_id: &correlation_id,
                    }),
                    BrokerMessage::SystemLog(payload) => serde_json::to_string(&WsFrame::SystemLog {
                        payload,
                        correlation_id: &correlation_id,
                    }),
                };
                let Ok(frame) = frame else { continue };
                match send_with_timeout(&mut socket, frame, send_timeout).await {
                    SendOutcome::Sent => {
                        state.broker.counters().messages_relayed.fetch_add(1, Ordering::Relaxed);
                    }
                    SendOutcome::Dropped => {
                        state.broker.counters().messages_dropped_backpressure.fetch_add(1, Ordering::Relaxed);
                    }
                    SendOutcome::Closed => break,
                }
            }
        }
    }

    tracing::info!(correlation_id, "websocket client disconnected");
}

enum SendOutcome {
    Sent,
    /// The send didn't complete within the backpressure cap; the frame is
    /// dropped for this subscriber, the connection stays open.
    Dropped,
    Closed,
}

/// Never blocks the relay loop for longer than `timeout` on one subscriber:
/// a slow client loses this frame instead of stalling every other connected
/// subscriber's delivery.
async fn send_with_timeout(socket: &mut WebSocket, frame: String, timeout: Duration) -> SendOutcome {
    match tokio::time::timeout(timeout, socket.send(Message::Text(frame.into()))).await {
        Ok(Ok(())) => SendOutcome::Sent,
        Ok(Err(_)) => SendOutcome::Closed,
        Err(_) => SendOutcome::Dropped,
    }
}
