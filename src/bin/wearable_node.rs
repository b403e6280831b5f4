// src/bin/wearable_node.rs
//! Wearable node: samples heart rate and relays it to companion nodes
//! over the TCP pairing link while one is reachable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use pulse_relay::config::{NodeRole, RelayConfig};
use pulse_relay::link::tcp::{TcpLink, TcpPeer};
use pulse_relay::link::TransportLink;
use pulse_relay::relay::WearableSession;
use pulse_relay::sensor::SimulatedSensor;
use pulse_relay::state::RelayState;

#[derive(Parser, Debug)]
#[command(name = "wearable_node", about = "Relay heart rate readings to a companion node")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on for capability queries
    #[arg(long)]
    listen: Option<String>,

    /// Companion address (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Milliseconds between simulated sensor readings
    #[arg(long, default_value_t = 1000)]
    cadence_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RelayConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(listen) = args.listen {
        config.link.listen = listen;
    }
    config.link.peers.extend(args.peers.into_iter().map(|address| TcpPeer {
        address,
        display_name: String::new(),
    }));
    config.validate()?;

    let role = NodeRole::Wearable;
    let local = config.local_node(role);
    log::info!("Starting wearable node {} ({})", local.display_name, local.id);

    let link = Arc::new(TcpLink::new(
        local,
        config.link.peers.clone(),
        config.connect_timeout(),
    ));
    link.advertise(&config.link.capability_tag).await?;
    let (bound, listener) = link.listen(&config.listen_address(role)).await?;
    log::info!("Pairing link bound to {}", bound);

    let sensor = SimulatedSensor::new(Duration::from_millis(args.cadence_ms));
    let ui_state = RelayState::new();
    let session = WearableSession::start(
        link.clone(),
        sensor.clone(),
        &config.link.capability_tag,
        config.poll_interval(role),
        ui_state.clone(),
    );
    let sampler = sensor.start();

    let mut snapshots = ui_state.watch();
    let ui_logger = tokio::spawn(async move {
        let mut last_label = "";
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            let label = snapshot.connectivity.status_label();
            if label != last_label {
                log::info!("Companion {}", label);
                last_label = label;
            }
            log::debug!("Heart rate: {:.1} BPM", snapshot.heart_rate);
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    sampler.abort();
    session.stop().await;
    ui_logger.abort();
    link.withdraw(&config.link.capability_tag).await?;
    listener.abort();
    Ok(())
}
