//! Transport trait definitions and core types
//!
//! Defines the abstract pairing-layer interface that both the simulated
//! link and the TCP link conform to. Implementations supply the fallible
//! primitives; the discovery and send entry points used by the relay are
//! provided on top of them and never return an error.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::LinkError;

/// Capability tag advertised and queried by both nodes.
///
/// Acts as the protocol version key: nodes built with different values
/// never discover each other.
pub const HEART_RATE_CAPABILITY: &str = "heart_rate_monitor_capability";

/// Channel path heart rate messages are sent on.
pub const HEART_RATE_PATH: &str = "/heart_rate";

/// Identity of a node on the pairing layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(pub String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub id: PeerIdentity,
    pub display_name: String,
    /// Whether the node answered the most recent probe.
    pub nearby: bool,
}

impl PeerNode {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: PeerIdentity::new(id),
            display_name: display_name.into(),
            nearby: true,
        }
    }
}

/// Which nodes a capability query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFilter {
    /// Only nodes that can be reached right now.
    Reachable,
    /// Every known node, including ones that are currently unreachable.
    All,
}

/// A message received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub source: PeerIdentity,
    pub path: String,
    pub payload: Vec<u8>,
}

/// Point-to-point link between a wearable node and its companion.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// This node's own identity.
    fn local_node(&self) -> &PeerNode;

    /// Register this node as offering `capability`.
    async fn advertise(&self, capability: &str) -> Result<(), LinkError>;

    /// Stop offering `capability`.
    async fn withdraw(&self, capability: &str) -> Result<(), LinkError>;

    /// Ask the pairing layer for nodes offering `capability`.
    async fn query_capability(
        &self,
        capability: &str,
        filter: DiscoveryFilter,
    ) -> Result<Vec<PeerNode>, LinkError>;

    /// Hand one payload to the pairing layer for delivery to `peer`.
    async fn transmit(
        &self,
        peer: &PeerIdentity,
        path: &str,
        payload: &[u8],
    ) -> Result<(), LinkError>;

    /// Subscribe to messages addressed to this node.
    fn inbound(&self) -> broadcast::Receiver<InboundMessage>;

    /// Discover peers offering `capability`.
    ///
    /// Duplicate identities are collapsed. Any transport error yields an
    /// empty result.
    async fn discover_peers(&self, capability: &str, filter: DiscoveryFilter) -> Vec<PeerNode> {
        match self.query_capability(capability, filter).await {
            Ok(nodes) => {
                let mut seen = HashSet::new();
                let nodes: Vec<PeerNode> = nodes
                    .into_iter()
                    .filter(|node| seen.insert(node.id.clone()))
                    .collect();
                log::debug!(
                    "Capability '{}' ({:?}): {} node(s)",
                    capability,
                    filter,
                    nodes.len()
                );
                nodes
            }
            Err(e) => {
                log::warn!("Discovery of '{}' failed: {}", capability, e);
                Vec::new()
            }
        }
    }

    /// Best-effort, at-most-once send. Returns whether the pairing layer
    /// accepted the payload.
    async fn send_message(&self, peer: &PeerIdentity, path: &str, payload: &[u8]) -> bool {
        match self.transmit(peer, path, payload).await {
            Ok(()) => {
                log::debug!("Sent {} byte(s) to {} on {}", payload.len(), peer, path);
                true
            }
            Err(e) => {
                log::warn!("Send to {} on {} failed: {}", peer, path, e);
                false
            }
        }
    }
}

/// Send the same payload to every peer concurrently.
///
/// Each attempt is independent: a failing peer never cancels the others.
/// Results are returned in the order of `peers`.
pub async fn send_to_all(
    link: &dyn TransportLink,
    peers: &[PeerNode],
    path: &str,
    payload: &[u8],
) -> Vec<(PeerIdentity, bool)> {
    let sends = peers.iter().map(|peer| async move {
        let ok = link.send_message(&peer.id, path, payload).await;
        (peer.id.clone(), ok)
    });
    join_all(sends).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_identity_display() {
        let id = PeerIdentity::new("node-7");
        assert_eq!(id.to_string(), "node-7");
        assert_eq!(id.as_str(), "node-7");
    }

    #[test]
    fn test_peer_node_serializes_identity_as_string() {
        let node = PeerNode::new("abc", "Pixel Watch");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["display_name"], "Pixel Watch");
        assert_eq!(json["nearby"], true);
    }
}
