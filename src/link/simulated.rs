//! In-process pairing layer simulator
//!
//! Provides a simulated network where wearable and companion nodes can
//! advertise capabilities, discover each other and exchange messages
//! entirely in-process. Used for integration testing without paired
//! hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::transport::{DiscoveryFilter, InboundMessage, PeerIdentity, PeerNode, TransportLink};
use super::LinkError;

struct SimNodeEntry {
    node: PeerNode,
    capabilities: HashSet<String>,
    reachable: bool,
    /// Sends addressed to this node are rejected while set.
    drop_inbound: bool,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

/// The simulated pairing layer shared by every node created from it.
pub struct SimLinkNetwork {
    nodes: Mutex<HashMap<PeerIdentity, SimNodeEntry>>,
}

impl SimLinkNetwork {
    /// Create a new simulated network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Create a new reachable node on this network.
    pub async fn create_node(self: &Arc<Self>, display_name: &str) -> SimLinkNode {
        let node = PeerNode::new(Uuid::new_v4().to_string(), display_name);
        let (inbound_tx, _) = broadcast::channel(64);
        {
            let mut nodes = self.nodes.lock().await;
            nodes.insert(
                node.id.clone(),
                SimNodeEntry {
                    node: node.clone(),
                    capabilities: HashSet::new(),
                    reachable: true,
                    drop_inbound: false,
                    inbound_tx: inbound_tx.clone(),
                },
            );
        }
        SimLinkNode {
            node,
            network: Arc::clone(self),
            inbound_tx,
            discovery_fails: AtomicBool::new(false),
        }
    }

    /// Move a node in or out of radio range.
    pub async fn set_reachable(&self, id: &PeerIdentity, reachable: bool) {
        let mut nodes = self.nodes.lock().await;
        if let Some(entry) = nodes.get_mut(id) {
            entry.reachable = reachable;
        }
    }

    /// Make sends addressed to `id` fail while the node stays discoverable.
    pub async fn set_drop_inbound(&self, id: &PeerIdentity, drop: bool) {
        let mut nodes = self.nodes.lock().await;
        if let Some(entry) = nodes.get_mut(id) {
            entry.drop_inbound = drop;
        }
    }
}

/// A node attached to a [`SimLinkNetwork`].
pub struct SimLinkNode {
    node: PeerNode,
    network: Arc<SimLinkNetwork>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    discovery_fails: AtomicBool,
}

impl SimLinkNode {
    pub fn id(&self) -> &PeerIdentity {
        &self.node.id
    }

    /// Make this node's capability queries fail.
    pub fn set_discovery_failure(&self, fail: bool) {
        self.discovery_fails.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportLink for SimLinkNode {
    fn local_node(&self) -> &PeerNode {
        &self.node
    }

    async fn advertise(&self, capability: &str) -> Result<(), LinkError> {
        let mut nodes = self.network.nodes.lock().await;
        let entry = nodes
            .get_mut(&self.node.id)
            .ok_or_else(|| LinkError::UnknownPeer(self.node.id.clone()))?;
        entry.capabilities.insert(capability.to_string());
        Ok(())
    }

    async fn withdraw(&self, capability: &str) -> Result<(), LinkError> {
        let mut nodes = self.network.nodes.lock().await;
        if let Some(entry) = nodes.get_mut(&self.node.id) {
            entry.capabilities.remove(capability);
        }
        Ok(())
    }

    async fn query_capability(
        &self,
        capability: &str,
        filter: DiscoveryFilter,
    ) -> Result<Vec<PeerNode>, LinkError> {
        if self.discovery_fails.load(Ordering::SeqCst) {
            return Err(LinkError::DiscoveryError(
                "simulated pairing layer failure".to_string(),
            ));
        }
        let nodes = self.network.nodes.lock().await;
        let mut found: Vec<PeerNode> = nodes
            .values()
            .filter(|entry| entry.node.id != self.node.id)
            .filter(|entry| entry.capabilities.contains(capability))
            .filter(|entry| filter == DiscoveryFilter::All || entry.reachable)
            .map(|entry| PeerNode {
                nearby: entry.reachable,
                ..entry.node.clone()
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn transmit(
        &self,
        peer: &PeerIdentity,
        path: &str,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let nodes = self.network.nodes.lock().await;
        let entry = nodes
            .get(peer)
            .ok_or_else(|| LinkError::UnknownPeer(peer.clone()))?;
        if !entry.reachable {
            return Err(LinkError::Unreachable(peer.clone()));
        }
        if entry.drop_inbound {
            return Err(LinkError::SendError(format!("{} rejected the message", peer)));
        }
        let message = InboundMessage {
            source: self.node.id.clone(),
            path: path.to_string(),
            payload: payload.to_vec(),
        };
        // No subscriber means nobody is listening on the far side; the
        // pairing layer still accepted the payload.
        let _ = entry.inbound_tx.send(message);
        Ok(())
    }

    fn inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }
}
