//! Wearable side of the relay
//!
//! Readings from the sensor are encoded and sent to every reachable
//! companion, but only while the connectivity monitor's last poll found
//! one. Readings taken while disconnected are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::codec;
use crate::link::{send_to_all, DiscoveryFilter, PeerIdentity, TransportLink, HEART_RATE_PATH};
use crate::monitor::{ConnectivityMonitor, ConnectivityState, MonitorHandle};
use crate::sensor::{ListenerGuard, ReadingSource};
use crate::state::RelayState;
use crate::types::heartrate::Reading;

/// Per-peer results of sending one reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReport {
    pub results: Vec<(PeerIdentity, bool)>,
}

impl SendReport {
    pub fn peer_count(&self) -> usize {
        self.results.len()
    }

    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|(_, ok)| *ok).count()
    }
}

#[derive(Clone)]
pub struct WearableRelay {
    link: Arc<dyn TransportLink>,
    capability: Arc<str>,
    reachable: Arc<AtomicBool>,
    runtime: Handle,
}

impl WearableRelay {
    /// `reachable` is the connectivity monitor's flag; it gates [`WearableRelay::relay`].
    ///
    /// Must be called from within a Tokio runtime. Sends are spawned onto
    /// that runtime, so [`WearableRelay::relay`] may be called from any
    /// thread afterwards.
    pub fn new(
        link: Arc<dyn TransportLink>,
        capability: &str,
        reachable: Arc<AtomicBool>,
    ) -> Self {
        Self {
            link,
            capability: Arc::from(capability),
            reachable,
            runtime: Handle::current(),
        }
    }

    /// Encode `reading` and send it to every reachable companion.
    pub async fn send_reading(&self, reading: Reading) -> SendReport {
        let peers = self
            .link
            .discover_peers(&self.capability, DiscoveryFilter::Reachable)
            .await;
        if peers.is_empty() {
            log::debug!("No companion offers '{}'", self.capability);
            return SendReport::default();
        }

        let payload = codec::encode(&reading);
        let results = send_to_all(self.link.as_ref(), &peers, HEART_RATE_PATH, &payload).await;
        let report = SendReport { results };
        log::debug!(
            "Sent {} BPM to {}/{} companion(s)",
            reading.value,
            report.delivered(),
            report.peer_count()
        );
        report
    }

    /// Send `reading` in the background if the last poll found a companion.
    ///
    /// Returns `None` when the reading was dropped because no companion was
    /// reachable.
    pub fn relay(&self, reading: Reading) -> Option<JoinHandle<SendReport>> {
        if !self.reachable.load(Ordering::Acquire) {
            log::debug!("Disconnected; dropping {} BPM", reading.value);
            return None;
        }
        let relay = self.clone();
        Some(self.runtime.spawn(async move { relay.send_reading(reading).await }))
    }
}

/// A running wearable node: connectivity polling plus a registered sensor
/// listener. Both are released when the session is stopped or dropped.
pub struct WearableSession {
    monitor: MonitorHandle,
    listener: ListenerGuard,
}

impl WearableSession {
    pub fn start(
        link: Arc<dyn TransportLink>,
        source: Arc<dyn ReadingSource>,
        capability: &str,
        poll_interval: Duration,
        ui_state: RelayState,
    ) -> Self {
        let monitor = ConnectivityMonitor::new(Arc::clone(&link), capability, poll_interval)
            .with_ui_state(ui_state.clone());
        let relay = WearableRelay::new(link, capability, monitor.reachable_flag());
        let monitor = monitor.start();

        let listener = ListenerGuard::register(
            source,
            Box::new(move |reading| {
                ui_state.publish_reading(reading);
                // Detached: a failed send only affects this reading.
                let _ = relay.relay(reading);
            }),
        );

        Self { monitor, listener }
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.current()
    }

    pub async fn stop(self) {
        let WearableSession { monitor, listener } = self;
        drop(listener);
        monitor.stop().await;
    }
}
