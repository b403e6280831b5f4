//! Companion side of the relay
//!
//! Messages arriving on the heart rate path are decoded, shown to the UI
//! and handed to the failover dispatcher. Anything that fails to decode is
//! dropped; the wearable is never told.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::codec;
use crate::dispatch::{DeliveryOutcome, FailoverDispatcher};
use crate::link::{DiscoveryFilter, InboundMessage, PeerNode, TransportLink, HEART_RATE_PATH};
use crate::monitor::{ConnectivityMonitor, ConnectivityState, MonitorHandle};
use crate::state::RelayState;

#[derive(Clone)]
pub struct CompanionRelay {
    state: RelayState,
    dispatcher: FailoverDispatcher,
}

impl CompanionRelay {
    pub fn new(state: RelayState, dispatcher: FailoverDispatcher) -> Self {
        Self { state, dispatcher }
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    pub fn dispatcher(&self) -> &FailoverDispatcher {
        &self.dispatcher
    }

    /// Process one inbound message.
    ///
    /// Returns the delivery task for a valid heart rate message, `None` for
    /// anything that was ignored or rejected.
    pub fn handle_message(&self, message: &InboundMessage) -> Option<JoinHandle<DeliveryOutcome>> {
        if message.path != HEART_RATE_PATH {
            log::debug!("Ignoring message from {} on {}", message.source, message.path);
            return None;
        }

        match codec::decode(&message.payload) {
            Ok(reading) => {
                log::info!(
                    "Received {} BPM at {} from {}",
                    reading.value,
                    reading.captured_at_millis,
                    message.source
                );
                self.state.publish_reading(reading);
                Some(self.dispatcher.spawn_deliver(reading))
            }
            Err(e) => {
                log::warn!(
                    "Dropping malformed message {:?} from {}: {}",
                    String::from_utf8_lossy(&message.payload),
                    message.source,
                    e
                );
                None
            }
        }
    }

    /// Consume inbound messages until `shutdown` fires or the link closes.
    pub async fn run(
        self,
        mut inbound: broadcast::Receiver<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = inbound.recv() => match result {
                    Ok(message) => {
                        // Deliveries run detached and may finish out of order.
                        let _ = self.handle_message(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Receiver lagged; {} message(s) lost", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        log::debug!("Companion receiver stopped");
    }
}

/// Run one discovery for `capability` and log every node found.
pub async fn log_capability(link: &dyn TransportLink, capability: &str) -> Vec<PeerNode> {
    let nodes = link
        .discover_peers(capability, DiscoveryFilter::Reachable)
        .await;
    log::info!("Capability '{}': {} node(s)", capability, nodes.len());
    for node in &nodes {
        log::info!(
            "Node found: {}, id: {}, nearby: {}",
            node.display_name,
            node.id,
            node.nearby
        );
    }
    nodes
}

/// Owns the inbound message loop. Dropping the handle stops the loop.
struct ReceiverHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    fn spawn(relay: CompanionRelay, inbound: broadcast::Receiver<InboundMessage>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown = shutdown_tx.subscribe();
        let task = tokio::spawn(relay.run(inbound, shutdown));
        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(());
            task.abort();
        }
    }
}

/// A running companion node: connectivity polling plus the inbound
/// message loop. Both stop when the session is stopped or dropped.
pub struct CompanionSession {
    monitor: MonitorHandle,
    receiver: ReceiverHandle,
}

impl CompanionSession {
    pub fn start(
        link: Arc<dyn TransportLink>,
        relay: CompanionRelay,
        capability: &str,
        poll_interval: Duration,
    ) -> Self {
        let monitor = ConnectivityMonitor::new(Arc::clone(&link), capability, poll_interval)
            .with_ui_state(relay.state().clone())
            .start();
        // Subscribe before spawning so nothing sent after start() is missed.
        let receiver = ReceiverHandle::spawn(relay, link.inbound());

        Self { monitor, receiver }
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.current()
    }

    pub async fn stop(self) {
        let CompanionSession { monitor, receiver } = self;
        receiver.stop().await;
        monitor.stop().await;
    }
}
