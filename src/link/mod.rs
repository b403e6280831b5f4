//! Wearable <-> companion transport link
//!
//! Provides the transport trait used by both relay nodes, an in-process
//! simulated pairing layer for testing, and a TCP pairing layer for
//! running the two nodes as separate processes.

pub mod simulated;
pub mod tcp;
pub mod transport;

use thiserror::Error;

pub use transport::{
    send_to_all, DiscoveryFilter, InboundMessage, PeerIdentity, PeerNode, TransportLink,
    HEART_RATE_CAPABILITY, HEART_RATE_PATH,
};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Send error: {0}")]
    SendError(String),

    #[error("Unknown peer {0}")]
    UnknownPeer(PeerIdentity),

    #[error("Peer {0} is not reachable")]
    Unreachable(PeerIdentity),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out")]
    Timeout,
}
