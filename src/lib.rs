// Pulse Relay - heart rate relay from wearable to remote collection endpoints

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod link;
pub mod monitor;
pub mod relay;
pub mod sensor;
pub mod state;
pub mod types;
