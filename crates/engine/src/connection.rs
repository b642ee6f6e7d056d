//! Event channel connection manager.
//!
//! [`ConnectionManager`] owns the single logical connection to the
//! engine's event channel. A background task runs the
//! connect -> process -> reconnect loop; the manager's API only flips
//! shared state and cancellation tokens, so every method is synchronous
//! and cheap.
//!
//! Lifecycle changes and parsed inbound messages are broadcast as
//! [`ConnectionEvent`]s. Call [`ConnectionManager::subscribe`] to receive
//! them, or [`ConnectionManager::watch_status`] for the status alone.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{EventChannelClient, EventChannelError, WsStream};
use crate::events::ConnectionEvent;
use crate::messages::{parse_message, EngineMessage};
use crate::reconnect::ReconnectPolicy;

/// Broadcast channel capacity for connection events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Status of the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Manages the event channel connection for the whole process.
///
/// Create one with [`ConnectionManager::new`], wrap it in an `Arc` and
/// share it with every orchestrator that should observe push events.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    client: EventChannelClient,
    policy: ReconnectPolicy,
    state: Mutex<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

/// Mutable connection bookkeeping, guarded by [`Inner::state`].
#[derive(Default)]
struct SharedState {
    client_id: Option<String>,
    attempts: u32,
    /// Outbound frame queue of the live socket, if any.
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Token of the running connection task, if any.
    cancel: Option<CancellationToken>,
    /// Bumped every time a connection task is spawned.
    generation: u64,
}

impl ConnectionManager {
    pub fn new(client: EventChannelClient, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                client,
                policy,
                state: Mutex::new(SharedState::default()),
                status_tx,
                event_tx,
            }),
        }
    }

    /// Open the event channel.
    ///
    /// No-op while a connection task is already alive (connected,
    /// connecting, or waiting for a scheduled reconnect). The reconnect
    /// counter is not reset here; only a successful open does that.
    pub fn connect(&self) {
        let mut state = self.inner.lock();
        if state.cancel.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        state.generation += 1;
        state.cancel = Some(cancel.clone());
        let generation = state.generation;
        self.inner.status_tx.send_replace(ConnectionStatus::Connecting);
        drop(state);

        tracing::info!(url = %self.inner.client.ws_url(), "Connecting to event channel");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_connection_loop(&inner, &cancel).await;
            inner.release(generation);
        });
    }

    /// Close the event channel and suppress automatic reconnection.
    ///
    /// Idempotent. The counter is pinned at its maximum, so only an
    /// explicit [`connect`](Self::connect) followed by a successful open
    /// re-enables reconnects.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.attempts = self.inner.policy.max_attempts;
        state.outbound = None;
        state.client_id = None;
        let was_running = match state.cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        };
        let previous = self
            .inner
            .status_tx
            .send_replace(ConnectionStatus::Disconnected);
        drop(state);

        if was_running || previous != ConnectionStatus::Disconnected {
            tracing::info!("Event channel disconnected on request");
            let _ = self.inner.event_tx.send(ConnectionEvent::Disconnected);
        }
    }

    /// Send a JSON payload over the event channel.
    ///
    /// Fire-and-forget: the payload is dropped unless the channel is
    /// currently connected. Returns whether it was queued.
    pub fn send<T: Serialize>(&self, payload: &T) -> bool {
        let state = self.inner.lock();
        let Some(outbound) = state.outbound.as_ref() else {
            tracing::debug!("Event channel not connected, dropping payload");
            return false;
        };
        if *self.inner.status_tx.borrow() != ConnectionStatus::Connected {
            return false;
        }

        match serde_json::to_string(payload) {
            Ok(text) => outbound.send(text).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize outbound payload");
                false
            }
        }
    }

    /// Subscribe to connection lifecycle events and inbound messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Read-only view of the connection status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Identifier assigned by the server's hello; `None` while disconnected.
    pub fn client_id(&self) -> Option<String> {
        self.inner.lock().client_id.clone()
    }

    /// Reconnect attempts consumed since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(cancel) = self.inner.lock().cancel.take() {
            cancel.cancel();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        // A poisoned lock only means a panic elsewhere; the state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `status` unless the task has been cancelled, so a late
    /// transition never overwrites a `disconnect()`.
    fn transition(&self, cancel: &CancellationToken, status: ConnectionStatus) -> bool {
        let _state = self.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.status_tx.send_replace(status);
        true
    }

    /// Forget the task registration if it still belongs to `generation`.
    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.cancel = None;
            state.outbound = None;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }

    fn handle_text(&self, text: &str) {
        match parse_message(text) {
            Ok(EngineMessage::Connected { client_id }) => {
                tracing::info!(client_id = %client_id, "Event channel handshake complete");
                self.lock().client_id = Some(client_id.clone());
                self.emit(ConnectionEvent::Connected { client_id });
            }
            Ok(msg) => {
                tracing::debug!(kind = msg.kind(), prompt_id = ?msg.prompt_id(), "Event received");
                self.emit(ConnectionEvent::Message(msg));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_message = %text,
                    "Failed to parse event channel message",
                );
            }
        }
    }
}

/// Core connection loop: connect -> process messages -> reconnect.
///
/// Runs until the token is cancelled or the reconnect budget is spent.
async fn run_connection_loop(inner: &Inner, cancel: &CancellationToken) {
    loop {
        if !inner.transition(cancel, ConnectionStatus::Connecting) {
            return;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = inner.client.connect() => result,
        };

        match result {
            Ok(ws_stream) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                {
                    let mut state = inner.lock();
                    if cancel.is_cancelled() {
                        return;
                    }
                    state.attempts = 0;
                    state.outbound = Some(outbound_tx);
                    inner.status_tx.send_replace(ConnectionStatus::Connected);
                }
                tracing::info!(url = %inner.client.ws_url(), "Event channel connected");

                run_session(inner, ws_stream, outbound_rx, cancel).await;

                // Once cancelled, the registration may already belong to a
                // newer task started by connect().
                let mut state = inner.lock();
                if !cancel.is_cancelled() {
                    state.outbound = None;
                    state.client_id = None;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Event channel connection failed");
                inner.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        if !inner.transition(cancel, ConnectionStatus::Disconnected) {
            return;
        }
        inner.emit(ConnectionEvent::Disconnected);

        let (delay, attempt) = {
            let mut state = inner.lock();
            let delay = inner.policy.next_attempt(&mut state.attempts);
            (delay, state.attempts)
        };
        let Some(delay) = delay else {
            tracing::warn!(
                attempts = attempt,
                "Event channel reconnect attempts exhausted, giving up",
            );
            return;
        };

        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling event channel reconnect",
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drive a single WebSocket session: forward queued outbound payloads and
/// dispatch inbound frames until the socket closes or the task is cancelled.
async fn run_session(
    inner: &Inner,
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::error!(error = %e, "Event channel send failed");
                    inner.emit(ConnectionEvent::Error {
                        message: EventChannelError::Protocol(e.to_string()).to_string(),
                    });
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => inner.handle_text(&text),
                    Some(Ok(Message::Binary(_))) => {
                        tracing::trace!("Ignoring binary event channel frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Event channel closed by server");
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Event channel receive error");
                        inner.emit(ConnectionEvent::Error {
                            message: EventChannelError::Protocol(e.to_string()).to_string(),
                        });
                        break;
                    }
                    None => {
                        tracing::info!("Event channel stream exhausted");
                        break;
                    }
                }
            }
        }
    }
}
