//! Relay nodes
//!
//! Glue between the reading source, the transport link, the connectivity
//! monitor, the UI state and the failover dispatcher for each side of the
//! relay.

pub mod companion;
pub mod wearable;

pub use companion::{log_capability, CompanionRelay, CompanionSession};
pub use wearable::{SendReport, WearableRelay, WearableSession};
