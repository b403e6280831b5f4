//! Connectivity monitor
//!
//! Polls the transport link on a fixed interval and records whether any
//! peer offering the relay capability is currently reachable. Each poll
//! overwrites the previous result; discovery failures read as
//! "unreachable" and are never surfaced to callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::link::{DiscoveryFilter, PeerNode, TransportLink};
use crate::state::RelayState;

/// Result of the most recent poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    /// No poll has completed yet.
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    pub status: LinkStatus,
    /// Peers seen by the last poll.
    pub peers: Vec<PeerNode>,
}

impl ConnectivityState {
    pub fn from_peers(peers: Vec<PeerNode>) -> Self {
        let status = if peers.is_empty() {
            LinkStatus::Unreachable
        } else {
            LinkStatus::Reachable
        };
        Self { status, peers }
    }

    pub fn reachable(&self) -> bool {
        self.status == LinkStatus::Reachable
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Short status text for display.
    pub fn status_label(&self) -> &'static str {
        match self.status {
            LinkStatus::Unknown => "checking",
            LinkStatus::Reachable => "connected",
            LinkStatus::Unreachable => "disconnected",
        }
    }
}

pub struct ConnectivityMonitor {
    link: Arc<dyn TransportLink>,
    capability: String,
    interval: Duration,
    state_tx: watch::Sender<ConnectivityState>,
    reachable: Arc<AtomicBool>,
    ui_state: Option<RelayState>,
}

impl ConnectivityMonitor {
    pub fn new(
        link: Arc<dyn TransportLink>,
        capability: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::default());
        Self {
            link,
            capability: capability.into(),
            interval,
            state_tx,
            reachable: Arc::new(AtomicBool::new(false)),
            ui_state: None,
        }
    }

    /// Also write every poll result into the UI state.
    pub fn with_ui_state(mut self, state: RelayState) -> Self {
        self.ui_state = Some(state);
        self
    }

    /// The shared reachability flag. Written only by this monitor.
    pub fn reachable_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reachable)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> ConnectivityState {
        self.state_tx.borrow().clone()
    }

    /// Run a single poll and publish its result.
    pub async fn poll_once(&self) -> ConnectivityState {
        let peers = self
            .link
            .discover_peers(&self.capability, DiscoveryFilter::Reachable)
            .await;
        let state = ConnectivityState::from_peers(peers);

        let was_reachable = self.reachable.swap(state.reachable(), Ordering::AcqRel);
        let previous = self.state_tx.borrow().status;
        if previous == LinkStatus::Unknown || was_reachable != state.reachable() {
            log::info!(
                "Connection status: {} ({} peer(s))",
                state.status_label(),
                state.peer_count()
            );
        }

        if let Some(ui_state) = &self.ui_state {
            ui_state.publish_connectivity(state.clone());
        }
        self.state_tx.send_replace(state.clone());
        state
    }

    /// Start polling in the background. The first poll runs immediately.
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state_rx = self.state_tx.subscribe();
        let reachable = Arc::clone(&self.reachable);
        let interval = self.interval;
        let mut shutdown = shutdown_tx.subscribe();

        let task = tokio::spawn(async move {
            loop {
                self.poll_once().await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.recv() => break,
                }
            }
            log::debug!("Connectivity monitor for '{}' stopped", self.capability);
        });

        MonitorHandle {
            shutdown_tx,
            task: Some(task),
            state_rx,
            reachable,
        }
    }
}

/// Owns a running poll loop. Dropping the handle stops the loop.
pub struct MonitorHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
    state_rx: watch::Receiver<ConnectivityState>,
    reachable: Arc<AtomicBool>,
}

impl MonitorHandle {
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub fn reachable_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reachable)
    }

    pub fn current(&self) -> ConnectivityState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(());
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::simulated::SimLinkNetwork;
    use crate::link::HEART_RATE_CAPABILITY;

    #[tokio::test]
    async fn test_poll_once_tracks_discovery() {
        let network = SimLinkNetwork::new();
        let phone = Arc::new(network.create_node("phone").await);
        let watch = network.create_node("watch").await;

        let monitor =
            ConnectivityMonitor::new(phone.clone(), HEART_RATE_CAPABILITY, Duration::from_secs(3));
        assert_eq!(monitor.current().status, LinkStatus::Unknown);

        let state = monitor.poll_once().await;
        assert_eq!(state.status, LinkStatus::Unreachable);
        assert!(!monitor.reachable_flag().load(Ordering::Acquire));

        watch.advertise(HEART_RATE_CAPABILITY).await.unwrap();
        let state = monitor.poll_once().await;
        assert!(state.reachable());
        assert_eq!(state.peer_count(), 1);
        assert!(monitor.reachable_flag().load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_discovery_error_reads_as_unreachable() {
        let network = SimLinkNetwork::new();
        let phone = Arc::new(network.create_node("phone").await);
        let watch = network.create_node("watch").await;
        watch.advertise(HEART_RATE_CAPABILITY).await.unwrap();

        let monitor =
            ConnectivityMonitor::new(phone.clone(), HEART_RATE_CAPABILITY, Duration::from_secs(3));
        assert!(monitor.poll_once().await.reachable());

        phone.set_discovery_failure(true);
        let state = monitor.poll_once().await;
        assert_eq!(state.status, LinkStatus::Unreachable);
        assert_eq!(state.peer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_flip_on_next_poll() {
        let network = SimLinkNetwork::new();
        let watch = Arc::new(network.create_node("watch").await);
        let phone = network.create_node("phone").await;

        let monitor =
            ConnectivityMonitor::new(watch.clone(), HEART_RATE_CAPABILITY, Duration::from_secs(5));
        let mut rx = monitor.subscribe();
        let handle = monitor.start();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, LinkStatus::Unreachable);
        assert!(!handle.is_reachable());

        phone.advertise(HEART_RATE_CAPABILITY).await.unwrap();
        let before = tokio::time::Instant::now();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().reachable());
        assert!(before.elapsed() <= Duration::from_secs(5));
        assert!(handle.is_reachable());

        network.set_reachable(phone.id(), false).await;
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().reachable());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let network = SimLinkNetwork::new();
        let watch = Arc::new(network.create_node("watch").await);

        let monitor =
            ConnectivityMonitor::new(watch.clone(), HEART_RATE_CAPABILITY, Duration::from_secs(1));
        let mut rx = monitor.subscribe();
        let handle = monitor.start();
        rx.changed().await.unwrap();
        handle.stop().await;

        // The sender lives in the finished task, so the channel is closed.
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_poll_writes_ui_state() {
        let network = SimLinkNetwork::new();
        let phone = Arc::new(network.create_node("phone").await);
        let watch = network.create_node("watch").await;
        watch.advertise(HEART_RATE_CAPABILITY).await.unwrap();

        let ui_state = RelayState::new();
        let monitor =
            ConnectivityMonitor::new(phone.clone(), HEART_RATE_CAPABILITY, Duration::from_secs(3))
                .with_ui_state(ui_state.clone());
        monitor.poll_once().await;

        let snapshot = ui_state.snapshot();
        assert!(snapshot.connectivity.reachable());
        assert_eq!(snapshot.connectivity.status_label(), "connected");
    }
}
