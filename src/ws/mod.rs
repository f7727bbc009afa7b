//! WebSocket transport for dashboard subscribers.
//!
//! Each connection gets two pumps. The read pump parses `subscribe` control
//! messages and enforces the idle deadline; anything else inbound is ignored.
//! The write pump drains the subscriber's mailbox, coalescing accumulated
//! snapshots with a newline separator, sends heartbeat pings, and tears the
//! subscriber down when a send misses the write deadline. Disconnection is
//! always routed through the broker so the mailbox closes exactly once.

use crate::broker::{Subscriber, SubscriptionBroker};
use crate::core::config::SubscriberConfig;
use crate::core::error::{Result, StrobeError};
use crate::core::types::MetricKey;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

/// Inbound control message: replace the subscription filter.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEntry {
    service: String,
    metric: String,
}

/// Shared state for the subscriber endpoint.
#[derive(Clone)]
pub struct WsState {
    pub broker: Arc<SubscriptionBroker>,
    pub config: SubscriberConfig,
}

/// Router exposing the subscriber endpoint and a liveness probe.
pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// Serve the subscriber endpoint until the shutdown signal flips.
pub async fn serve(addr: SocketAddr, state: WsState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "websocket server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(StrobeError::Io)?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (subscriber, mailbox) = state.broker.register();
    let (sink, stream) = socket.split();

    let writer = {
        let broker = Arc::clone(&state.broker);
        let id = subscriber.id();
        let config = state.config.clone();
        tokio::spawn(async move {
            run_write_pump(sink, mailbox, config).await;
            // A write deadline or transport failure disconnects the
            // subscriber even while the read side is still alive.
            broker.unregister(id);
        })
    };

    run_read_pump(stream, &state, &subscriber).await;

    state.broker.unregister(subscriber.id());
    // Unregister closed the mailbox; the write pump finishes its close frame
    // before the task is reaped.
    let _ = writer.await;
}

/// Read side: applies subscribe control messages and enforces the idle
/// deadline. Any inbound frame refreshes the deadline.
async fn run_read_pump<S>(mut stream: S, state: &WsState, subscriber: &Subscriber)
where
    S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    loop {
        match timeout(state.config.idle_timeout, stream.next()).await {
            Err(_) => {
                tracing::debug!(subscriber = %subscriber.id(), "idle deadline expired");
                return;
            },
            Ok(None) => return,
            Ok(Some(Err(err))) => {
                tracing::debug!(subscriber = %subscriber.id(), error = %err, "websocket read failed");
                return;
            },
            Ok(Some(Ok(Message::Text(text)))) => apply_control(state, subscriber, &text),
            Ok(Some(Ok(Message::Close(_)))) => return,
            Ok(Some(Ok(_))) => {},
        }
    }
}

/// Parse and apply one control message. Unknown types and parse failures are
/// ignored silently.
fn apply_control(state: &WsState, subscriber: &Subscriber, text: &str) {
    let Ok(message) = serde_json::from_str::<ControlMessage>(text) else {
        return;
    };
    if message.kind != "subscribe" {
        return;
    }
    let filter: Vec<MetricKey> = message
        .subscriptions
        .into_iter()
        .filter_map(|entry| MetricKey::new(entry.service, entry.metric).ok())
        .collect();
    tracing::debug!(subscriber = %subscriber.id(), entries = filter.len(), "subscription updated");
    state.broker.set_subscription(subscriber.id(), filter);
}

/// Write side: drains the mailbox and emits heartbeat pings. Returns when the
/// mailbox closes (broker-side disconnect) or a send misses the write
/// deadline.
async fn run_write_pump<S>(mut sink: S, mut mailbox: mpsc::Receiver<String>, config: SubscriberConfig)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = mailbox.recv() => {
                let Some(mut payload) = message else {
                    // Mailbox closed: the broker disconnected us. Best-effort
                    // close frame, then unwind.
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                };
                // Coalesce whatever else has accumulated since the last send.
                while let Ok(next) = mailbox.try_recv() {
                    payload.push('\n');
                    payload.push_str(&next);
                }
                match timeout(config.write_timeout, sink.send(Message::Text(payload))).await {
                    Ok(Ok(())) => {},
                    Ok(Err(err)) => {
                        tracing::debug!(error = %err, "websocket write failed");
                        return;
                    },
                    Err(_) => {
                        tracing::debug!("write deadline expired");
                        return;
                    },
                }
            }
            _ = ping.tick() => {
                match timeout(config.write_timeout, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {},
                    _ => return,
                }
            }
        }
    }
}
