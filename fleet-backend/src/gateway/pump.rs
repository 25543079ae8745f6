//! Per-task event pump.
//!
//! Each task execution gets its own pump: a dedicated consumer task that
//! owns outbound event delivery for that run. Workers hand events to the
//! pump and may wait (bounded) for a delivery acknowledgment; a timeout or
//! a closed pump is swallowed — event delivery never fails a workflow.
//! The engine tears the pump down when the run finishes, success or
//! failure.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::gateway::events::EventBroadcaster;
use crate::gateway::protocol::GatewayEvent;

/// How long a producer waits for the delivery acknowledgment.
const DELIVERY_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for the consumer to drain before aborting it.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct PumpMsg {
    event: GatewayEvent,
    ack: oneshot::Sender<()>,
}

/// Cheap clone handed to workers; publishing goes through the pump's
/// queue to the single consumer.
#[derive(Clone)]
pub struct PumpHandle {
    tx: mpsc::UnboundedSender<PumpMsg>,
}

impl PumpHandle {
    /// Enqueue an event and wait (bounded) for the consumer to confirm
    /// delivery. Errors and timeouts are logged and swallowed.
    pub async fn publish(&self, event: GatewayEvent) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(PumpMsg {
                event,
                ack: ack_tx,
            })
            .is_err()
        {
            log::debug!("[PUMP] Pump already stopped, dropping event");
            return;
        }

        match tokio::time::timeout(DELIVERY_ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => log::debug!("[PUMP] Consumer dropped before acknowledging"),
            Err(_) => log::warn!(
                "[PUMP] Timed out after {:?} waiting for delivery ack",
                DELIVERY_ACK_TIMEOUT
            ),
        }
    }
}

/// Dedicated delivery loop for one task execution.
pub struct EventPump {
    handle: PumpHandle,
    consumer: tokio::task::JoinHandle<()>,
}

impl EventPump {
    /// Spawn the consumer task delivering into the process-wide
    /// broadcaster.
    pub fn start(broadcaster: Arc<EventBroadcaster>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PumpMsg>();

        let consumer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                broadcaster.broadcast(msg.event);
                let _ = msg.ack.send(());
            }
            log::debug!("[PUMP] Consumer drained, stopping");
        });

        Self {
            handle: PumpHandle { tx },
            consumer,
        }
    }

    pub fn handle(&self) -> PumpHandle {
        self.handle.clone()
    }

    /// Close the queue and wait for the consumer to drain. All worker
    /// handles must be dropped by now; if one leaked, the consumer is
    /// aborted after a grace period instead of hanging the engine.
    pub async fn shutdown(self) {
        let Self { handle, consumer } = self;
        let mut consumer = consumer;
        drop(handle);
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, &mut consumer)
            .await
            .is_err()
        {
            log::warn!("[PUMP] Consumer did not drain in time, aborting");
            consumer.abort();
        }
    }
}

/// Log-line publisher for one task, with consecutive-duplicate
/// suppression: an (email, level, message) triple identical to the
/// previous one is dropped.
#[derive(Clone)]
pub struct TaskLogger {
    pump: PumpHandle,
    last: Arc<Mutex<Option<(Option<String>, String, String)>>>,
}

impl TaskLogger {
    pub fn new(pump: PumpHandle) -> Self {
        Self {
            pump,
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn info(&self, email: Option<&str>, message: &str) {
        self.log("info", message, email).await;
    }

    pub async fn warn(&self, email: Option<&str>, message: &str) {
        self.log("warning", message, email).await;
    }

    pub async fn error(&self, email: Option<&str>, message: &str) {
        self.log("error", message, email).await;
    }

    async fn log(&self, level: &str, message: &str, email: Option<&str>) {
        {
            let mut last = self.last.lock();
            let key = (
                email.map(String::from),
                level.to_string(),
                message.to_string(),
            );
            if last.as_ref() == Some(&key) {
                return;
            }
            *last = Some(key);
        }

        match level {
            "error" => log::error!("[TASK] {}{}", prefix(email), message),
            "warning" => log::warn!("[TASK] {}{}", prefix(email), message),
            _ => log::info!("[TASK] {}{}", prefix(email), message),
        }

        self.pump
            .publish(GatewayEvent::log(level, message, email))
            .await;
    }
}

fn prefix(email: Option<&str>) -> String {
    match email {
        Some(email) => format!("{}: ", email),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv_logs(
        rx: &mut mpsc::Receiver<GatewayEvent>,
        expected: usize,
    ) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        for _ in 0..expected {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                _ => break,
            }
        }
        events
    }

    #[tokio::test]
    async fn test_publish_delivers_through_broadcaster() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let (_id, mut rx) = broadcaster.subscribe();
        let pump = EventPump::start(broadcaster.clone());

        pump.handle()
            .publish(GatewayEvent::log("info", "one", None))
            .await;
        pump.shutdown().await;

        let events = recv_logs(&mut rx, 1).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["message"], "one");
    }

    #[tokio::test]
    async fn test_consecutive_duplicate_logs_are_suppressed() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let (_id, mut rx) = broadcaster.subscribe();
        let pump = EventPump::start(broadcaster.clone());
        let logger = TaskLogger::new(pump.handle());

        logger.info(Some("a@x.com"), "working").await;
        logger.info(Some("a@x.com"), "working").await;
        logger.info(Some("a@x.com"), "done").await;
        // Same message again after a different one is delivered again.
        logger.info(Some("a@x.com"), "working").await;
        pump.shutdown().await;

        let events = recv_logs(&mut rx, 3).await;
        let messages: Vec<_> = events
            .iter()
            .map(|e| e.data["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(messages, vec!["working", "done", "working"]);

        // Nothing else was delivered.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_different_email_is_not_a_duplicate() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let (_id, mut rx) = broadcaster.subscribe();
        let pump = EventPump::start(broadcaster.clone());
        let logger = TaskLogger::new(pump.handle());

        logger.info(Some("a@x.com"), "working").await;
        logger.info(Some("b@x.com"), "working").await;
        pump.shutdown().await;

        let events = recv_logs(&mut rx, 2).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_is_swallowed() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let pump = EventPump::start(broadcaster.clone());
        let handle = pump.handle();
        pump.shutdown().await;

        // Must return promptly and not panic.
        handle.publish(GatewayEvent::log("info", "late", None)).await;
    }
}
