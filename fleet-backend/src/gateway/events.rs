use crate::gateway::protocol::GatewayEvent;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Internal commands sent to the background broadcast task.
enum BroadcastCmd {
    /// Deliver an event to all current subscribers.
    Send(GatewayEvent),
    /// Remove a subscriber.
    Unsubscribe(String),
}

/// Broadcasts events to all connected WebSocket clients.
///
/// Calling `broadcast()` is non-blocking: the event is sent to an internal
/// channel and a background tokio task handles cloning and per-client
/// delivery so producers (the task engine's event pump) are never stalled
/// by slow subscribers.
pub struct EventBroadcaster {
    /// Non-blocking command channel to the background task.
    cmd_tx: mpsc::UnboundedSender<BroadcastCmd>,
    /// Shared client map — used by `subscribe` / `unsubscribe` /
    /// `client_count` from any thread without going through the channel.
    clients: Arc<DashMap<String, mpsc::Sender<GatewayEvent>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let clients: Arc<DashMap<String, mpsc::Sender<GatewayEvent>>> = Arc::new(DashMap::new());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        // Spawn the background broadcast loop
        tokio::spawn(Self::run_loop(cmd_rx, clients.clone()));

        Self { cmd_tx, clients }
    }

    /// Subscribe a new client and return (client_id, receiver).
    pub fn subscribe(&self) -> (String, mpsc::Receiver<GatewayEvent>) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(1000);

        self.clients.insert(client_id.clone(), tx);

        log::debug!("Client {} subscribed to events", client_id);
        (client_id, rx)
    }

    /// Unsubscribe a client.
    pub fn unsubscribe(&self, client_id: &str) {
        self.clients.remove(client_id);
        let _ = self
            .cmd_tx
            .send(BroadcastCmd::Unsubscribe(client_id.to_string()));
        log::debug!("Client {} unsubscribed from events", client_id);
    }

    /// Queue an event for broadcast. Returns immediately — the actual
    /// fan-out happens on the background task.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.cmd_tx.send(BroadcastCmd::Send(event));
    }

    /// Get the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ── background task ──────────────────────────────────────────────

    async fn run_loop(
        mut cmd_rx: mpsc::UnboundedReceiver<BroadcastCmd>,
        clients: Arc<DashMap<String, mpsc::Sender<GatewayEvent>>>,
    ) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                BroadcastCmd::Send(event) => {
                    let event_name = event.event.clone();

                    // Log the full payload for debugging (gated to avoid
                    // serialization work when debug logging is disabled)
                    if log::log_enabled!(log::Level::Debug) {
                        if let Ok(json) = serde_json::to_string(&event) {
                            log::debug!(
                                "[BROADCAST] '{}' to {} client(s): {}",
                                event_name,
                                clients.len(),
                                json
                            );
                        }
                    }

                    let mut failed_clients = Vec::new();

                    for entry in clients.iter() {
                        let client_id = entry.key().clone();
                        let sender = entry.value();

                        match sender.try_send(event.clone()) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                log::warn!(
                                    "[BROADCAST] Channel full for client {}, dropping '{}' event",
                                    client_id,
                                    event_name
                                );
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                failed_clients.push(client_id);
                            }
                        }
                    }

                    // Clean up disconnected clients
                    for client_id in failed_clients {
                        clients.remove(&client_id);
                        log::debug!("Removed disconnected client {}", client_id);
                    }
                }
                BroadcastCmd::Unsubscribe(client_id) => {
                    clients.remove(&client_id);
                }
            }
        }

        log::info!("[BROADCAST] Background broadcast loop shutting down");
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let broadcaster = EventBroadcaster::new();
        let (_id, mut rx) = broadcaster.subscribe();
        assert_eq!(broadcaster.client_count(), 1);

        broadcaster.broadcast(GatewayEvent::log("info", "hello", None));

        let event = rx.recv().await.expect("event");
        assert_eq!(event.event, "log");
        assert_eq!(event.data["message"], "hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = EventBroadcaster::new();
        let (id, mut rx) = broadcaster.subscribe();
        broadcaster.unsubscribe(&id);
        assert_eq!(broadcaster.client_count(), 0);

        broadcaster.broadcast(GatewayEvent::log("info", "dropped", None));
        // The channel is closed once the sender is removed.
        assert!(rx.recv().await.is_none());
    }
}
