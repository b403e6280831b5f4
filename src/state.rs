//! Observable relay state for the UI layer
//!
//! The relay pipeline writes the latest heart rate and the last
//! connectivity poll into a [`RelayState`]; the UI reads snapshots or
//! subscribes to changes. Decoded readings are also announced as a
//! `HEART_RATE_UPDATE` event so listeners need no reference to the
//! receiving side.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::monitor::ConnectivityState;
use crate::types::heartrate::Reading;

/// Name of the heart rate update event.
pub const HEART_RATE_UPDATE: &str = "HEART_RATE_UPDATE";

/// Payload key of the heart rate update event.
pub const HEART_RATE_KEY: &str = "heart_rate";

/// Event announced to UI listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum UiEvent {
    #[serde(rename = "HEART_RATE_UPDATE")]
    HeartRateUpdate { heart_rate: f32 },
}

impl UiEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UiEvent::HeartRateUpdate { .. } => HEART_RATE_UPDATE,
        }
    }
}

/// What the UI renders.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct UiSnapshot {
    /// Latest heart rate, 0.0 until the first reading arrives.
    pub heart_rate: f32,
    pub last_reading: Option<Reading>,
    pub connectivity: ConnectivityState,
}

/// Shared handle to the UI-facing state. Cloning yields another handle to
/// the same state.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    snapshot_tx: watch::Sender<UiSnapshot>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl RelayState {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(UiSnapshot::default());
        let (event_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(RelayStateInner {
                snapshot_tx,
                event_tx,
            }),
        }
    }

    /// Record a new reading and announce it.
    pub fn publish_reading(&self, reading: Reading) {
        self.inner.snapshot_tx.send_modify(|snapshot| {
            snapshot.heart_rate = reading.value;
            snapshot.last_reading = Some(reading);
        });
        let event = UiEvent::HeartRateUpdate {
            heart_rate: reading.value,
        };
        log::debug!("{} {}={}", event.name(), HEART_RATE_KEY, reading.value);
        // No listener is fine; the snapshot still holds the value.
        let _ = self.inner.event_tx.send(event);
    }

    /// Overwrite the connectivity part of the state with the latest poll.
    pub fn publish_connectivity(&self, connectivity: ConnectivityState) {
        self.inner.snapshot_tx.send_modify(|snapshot| {
            snapshot.connectivity = connectivity;
        });
    }

    pub fn snapshot(&self) -> UiSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn watch(&self) -> watch::Receiver<UiSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Subscribe to UI events.
    pub fn events(&self) -> broadcast::Receiver<UiEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::PeerNode;
    use crate::monitor::LinkStatus;

    #[test]
    fn test_initial_snapshot() {
        let state = RelayState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.heart_rate, 0.0);
        assert!(snapshot.last_reading.is_none());
        assert_eq!(snapshot.connectivity.status, LinkStatus::Unknown);
    }

    #[tokio::test]
    async fn test_publish_reading_updates_snapshot_and_event() {
        let state = RelayState::new();
        let mut events = state.events();
        let mut watcher = state.watch();

        state.publish_reading(Reading::new(88.0, 12));

        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow().heart_rate, 88.0);
        assert_eq!(
            events.recv().await.unwrap(),
            UiEvent::HeartRateUpdate { heart_rate: 88.0 }
        );
        assert_eq!(state.snapshot().last_reading, Some(Reading::new(88.0, 12)));
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(UiEvent::HeartRateUpdate { heart_rate: 70.5 }).unwrap();
        assert_eq!(json["action"], HEART_RATE_UPDATE);
        assert_eq!(json[HEART_RATE_KEY], 70.5);
    }

    #[test]
    fn test_connectivity_overwrites_previous_poll() {
        let state = RelayState::new();
        state.publish_connectivity(ConnectivityState::from_peers(vec![PeerNode::new(
            "phone-1", "Phone",
        )]));
        assert!(state.snapshot().connectivity.reachable());
        state.publish_connectivity(ConnectivityState::from_peers(Vec::new()));
        assert_eq!(state.snapshot().connectivity.status, LinkStatus::Unreachable);
    }
}
