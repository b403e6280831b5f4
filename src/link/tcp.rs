//! TCP pairing layer
//!
//! Each node listens on a TCP address and knows a static list of peer
//! addresses. Frames are newline-delimited JSON. Capability queries open a
//! short-lived connection to every configured peer and ask whether it
//! offers the tag; messages are written on a fresh connection per send.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::transport::{DiscoveryFilter, InboundMessage, PeerIdentity, PeerNode, TransportLink};
use super::LinkError;

/// A statically configured peer address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpPeer {
    pub address: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LinkFrame {
    CapabilityQuery {
        capability: String,
    },
    CapabilityReply {
        node: PeerNode,
        advertised: bool,
    },
    Message {
        source: PeerIdentity,
        path: String,
        payload: Vec<u8>,
    },
}

/// How long an inbound connection may stay silent before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

fn encode_frame(frame: &LinkFrame) -> Result<Vec<u8>, LinkError> {
    let mut line =
        serde_json::to_vec(frame).map_err(|e| LinkError::InvalidFrame(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

fn decode_frame(line: &str) -> Result<LinkFrame, LinkError> {
    serde_json::from_str(line.trim()).map_err(|e| LinkError::InvalidFrame(e.to_string()))
}

pub struct TcpLink {
    local: PeerNode,
    peers: Vec<TcpPeer>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    capabilities: Arc<RwLock<HashSet<String>>>,
    /// Nodes learned from capability replies, keyed by the address they answered on.
    known: RwLock<HashMap<String, PeerNode>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

impl TcpLink {
    pub fn new(local: PeerNode, peers: Vec<TcpPeer>, connect_timeout: Duration) -> Self {
        let (inbound_tx, _) = broadcast::channel(256);
        Self {
            local,
            peers,
            connect_timeout,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            capabilities: Arc::new(RwLock::new(HashSet::new())),
            known: RwLock::new(HashMap::new()),
            inbound_tx,
        }
    }

    /// Close inbound connections that send nothing for `idle_timeout`.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Bind `addr` and answer capability queries and messages from peers.
    ///
    /// Returns the bound address and the accept loop's task handle.
    pub async fn listen(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), LinkError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("[TcpLink] Listening on {}", local_addr);

        let node = self.local.clone();
        let capabilities = Arc::clone(&self.capabilities);
        let inbound_tx = self.inbound_tx.clone();
        let idle_timeout = self.idle_timeout;

        let handle = tokio::spawn(async move {
            loop {
                let (socket, peer_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!("[TcpLink] Accept failed: {}", e);
                        sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };
                let node = node.clone();
                let capabilities = Arc::clone(&capabilities);
                let inbound_tx = inbound_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        serve_connection(socket, node, capabilities, inbound_tx, idle_timeout)
                            .await
                    {
                        log::debug!("[TcpLink] Connection from {} ended: {}", peer_addr, e);
                    }
                });
            }
        });

        Ok((local_addr, handle))
    }

    async fn probe(
        &self,
        peer: &TcpPeer,
        capability: &str,
    ) -> Result<(PeerNode, bool), LinkError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&peer.address))
            .await
            .map_err(|_| LinkError::Timeout)??;
        let (read_half, mut write_half) = stream.into_split();

        let query = encode_frame(&LinkFrame::CapabilityQuery {
            capability: capability.to_string(),
        })?;
        write_half.write_all(&query).await?;
        write_half.flush().await?;

        let mut lines = BufReader::new(read_half).lines();
        let line = timeout(self.connect_timeout, lines.next_line())
            .await
            .map_err(|_| LinkError::Timeout)??
            .ok_or_else(|| LinkError::InvalidFrame("connection closed before reply".into()))?;

        match decode_frame(&line)? {
            LinkFrame::CapabilityReply { node, advertised } => Ok((node, advertised)),
            other => Err(LinkError::InvalidFrame(format!(
                "expected capability reply, got {:?}",
                other
            ))),
        }
    }

    async fn address_of(&self, peer: &PeerIdentity) -> Option<String> {
        let known = self.known.read().await;
        known
            .iter()
            .find(|(_, node)| node.id == *peer)
            .map(|(address, _)| address.clone())
    }
}

async fn serve_connection(
    socket: TcpStream,
    node: PeerNode,
    capabilities: Arc<RwLock<HashSet<String>>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    idle_timeout: Duration,
) -> Result<(), LinkError> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = timeout(idle_timeout, lines.next_line())
        .await
        .map_err(|_| LinkError::Timeout)??
    {
        if line.trim().is_empty() {
            continue;
        }
        match decode_frame(&line)? {
            LinkFrame::CapabilityQuery { capability } => {
                let advertised = capabilities.read().await.contains(&capability);
                let reply = encode_frame(&LinkFrame::CapabilityReply {
                    node: node.clone(),
                    advertised,
                })?;
                write_half.write_all(&reply).await?;
                write_half.flush().await?;
            }
            LinkFrame::Message {
                source,
                path,
                payload,
            } => {
                log::debug!("[TcpLink] Message from {} on {}", source, path);
                let _ = inbound_tx.send(InboundMessage {
                    source,
                    path,
                    payload,
                });
            }
            LinkFrame::CapabilityReply { .. } => {
                return Err(LinkError::InvalidFrame("unsolicited capability reply".into()));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl TransportLink for TcpLink {
    fn local_node(&self) -> &PeerNode {
        &self.local
    }

    async fn advertise(&self, capability: &str) -> Result<(), LinkError> {
        self.capabilities.write().await.insert(capability.to_string());
        Ok(())
    }

    async fn withdraw(&self, capability: &str) -> Result<(), LinkError> {
        self.capabilities.write().await.remove(capability);
        Ok(())
    }

    async fn query_capability(
        &self,
        capability: &str,
        filter: DiscoveryFilter,
    ) -> Result<Vec<PeerNode>, LinkError> {
        if capability.is_empty() {
            return Err(LinkError::DiscoveryError("empty capability tag".into()));
        }

        let probes = self.peers.iter().map(|peer| async move {
            (peer, self.probe(peer, capability).await)
        });
        let results = join_all(probes).await;

        let mut known = self.known.write().await;
        let mut found = Vec::new();
        for (peer, result) in results {
            match result {
                Ok((mut node, true)) => {
                    node.nearby = true;
                    if !peer.display_name.is_empty() && node.display_name.is_empty() {
                        node.display_name = peer.display_name.clone();
                    }
                    known.insert(peer.address.clone(), node.clone());
                    found.push(node);
                }
                Ok((node, false)) => {
                    log::debug!(
                        "[TcpLink] {} at {} does not offer '{}'",
                        node.id,
                        peer.address,
                        capability
                    );
                }
                Err(e) => {
                    log::debug!("[TcpLink] Probe of {} failed: {}", peer.address, e);
                    if filter == DiscoveryFilter::All {
                        if let Some(node) = known.get(&peer.address) {
                            found.push(PeerNode {
                                nearby: false,
                                ..node.clone()
                            });
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    async fn transmit(
        &self,
        peer: &PeerIdentity,
        path: &str,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let address = self
            .address_of(peer)
            .await
            .ok_or_else(|| LinkError::UnknownPeer(peer.clone()))?;

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| LinkError::Timeout)?
            .map_err(|_| LinkError::Unreachable(peer.clone()))?;

        let frame = encode_frame(&LinkFrame::Message {
            source: self.local.id.clone(),
            path: path.to_string(),
            payload: payload.to_vec(),
        })?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }

    fn inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::{HEART_RATE_CAPABILITY, HEART_RATE_PATH};
    use tokio::io::AsyncReadExt;

    fn node(id: &str, name: &str) -> PeerNode {
        PeerNode::new(id, name)
    }

    #[test]
    fn test_frame_encoding_is_single_line() {
        let frame = LinkFrame::Message {
            source: PeerIdentity::new("watch"),
            path: HEART_RATE_PATH.to_string(),
            payload: b"HR:72.5:1700000000000".to_vec(),
        };
        let line = encode_frame(&frame).unwrap();
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(*line.last().unwrap(), b'\n');

        let text = String::from_utf8(line).unwrap();
        match decode_frame(&text).unwrap() {
            LinkFrame::Message { path, payload, .. } => {
                assert_eq!(path, HEART_RATE_PATH);
                assert_eq!(payload, b"HR:72.5:1700000000000");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discover_and_send_over_tcp() {
        let phone = TcpLink::new(node("phone-1", "Phone"), Vec::new(), Duration::from_secs(1));
        phone.advertise(HEART_RATE_CAPABILITY).await.unwrap();
        let (addr, _server) = phone.listen("127.0.0.1:0").await.unwrap();
        let mut rx = phone.inbound();

        let watch = TcpLink::new(
            node("watch-1", "Watch"),
            vec![TcpPeer {
                address: addr.to_string(),
                display_name: "Phone".into(),
            }],
            Duration::from_secs(1),
        );

        let found = watch
            .discover_peers(HEART_RATE_CAPABILITY, DiscoveryFilter::Reachable)
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, PeerIdentity::new("phone-1"));

        assert!(watch.send_message(&found[0].id, HEART_RATE_PATH, b"HR:61.0:42").await);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.source, PeerIdentity::new("watch-1"));
        assert_eq!(msg.payload, b"HR:61.0:42");
    }

    #[tokio::test]
    async fn test_unadvertised_capability_is_not_reported() {
        let phone = TcpLink::new(node("phone-2", "Phone"), Vec::new(), Duration::from_secs(1));
        let (addr, _server) = phone.listen("127.0.0.1:0").await.unwrap();

        let watch = TcpLink::new(
            node("watch-2", "Watch"),
            vec![TcpPeer {
                address: addr.to_string(),
                display_name: String::new(),
            }],
            Duration::from_secs(1),
        );
        let found = watch
            .discover_peers(HEART_RATE_CAPABILITY, DiscoveryFilter::Reachable)
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_all_filter_reports_known_peer_after_it_goes_away() {
        let phone = TcpLink::new(node("phone-4", "Phone"), Vec::new(), Duration::from_secs(1));
        phone.advertise(HEART_RATE_CAPABILITY).await.unwrap();
        let (addr, server) = phone.listen("127.0.0.1:0").await.unwrap();

        let watch = TcpLink::new(
            node("watch-4", "Watch"),
            vec![TcpPeer {
                address: addr.to_string(),
                display_name: "Phone".into(),
            }],
            Duration::from_millis(200),
        );
        let found = watch
            .discover_peers(HEART_RATE_CAPABILITY, DiscoveryFilter::Reachable)
            .await;
        assert_eq!(found.len(), 1);
        assert!(found[0].nearby);

        // Dropping the accept loop closes the listening socket.
        server.abort();
        let _ = server.await;

        let reachable = watch
            .discover_peers(HEART_RATE_CAPABILITY, DiscoveryFilter::Reachable)
            .await;
        assert!(reachable.is_empty());

        let all = watch
            .discover_peers(HEART_RATE_CAPABILITY, DiscoveryFilter::All)
            .await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, PeerIdentity::new("phone-4"));
        assert!(!all[0].nearby);
    }

    #[tokio::test]
    async fn test_silent_connection_is_closed() {
        let phone = TcpLink::new(node("phone-5", "Phone"), Vec::new(), Duration::from_secs(1))
            .with_idle_timeout(Duration::from_millis(100));
        let (addr, _server) = phone.listen("127.0.0.1:0").await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("idle connection was never closed");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_unreachable_address_yields_empty_set() {
        // Bind and drop to get an address nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let watch = TcpLink::new(
            node("watch-3", "Watch"),
            vec![TcpPeer {
                address: addr.to_string(),
                display_name: "Phone".into(),
            }],
            Duration::from_millis(200),
        );
        let found = watch
            .discover_peers(HEART_RATE_CAPABILITY, DiscoveryFilter::Reachable)
            .await;
        assert!(found.is_empty());
        assert!(!watch
            .send_message(&PeerIdentity::new("phone"), HEART_RATE_PATH, b"HR:1.0:1")
            .await);
    }
}
