// src/bin/companion_node.rs
//! Companion node: receives heart rate messages from the wearable and
//! forwards each reading to the configured collection endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use pulse_relay::config::{NodeRole, RelayConfig};
use pulse_relay::dispatch::FailoverDispatcher;
use pulse_relay::link::tcp::{TcpLink, TcpPeer};
use pulse_relay::link::TransportLink;
use pulse_relay::relay::{log_capability, CompanionRelay, CompanionSession};
use pulse_relay::state::RelayState;

#[derive(Parser, Debug)]
#[command(
    name = "companion_node",
    about = "Forward wearable heart rate readings to remote endpoints"
)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on for the wearable
    #[arg(long)]
    listen: Option<String>,

    /// Wearable address (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Skip the startup probe of every endpoint
    #[arg(long)]
    no_probe: bool,
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
    if args.no_probe {
        config.delivery.probe_on_start = false;
    }
    config.validate()?;

    let role = NodeRole::Companion;
    let local = config.local_node(role);
    log::info!("Starting companion node {} ({})", local.display_name, local.id);

    let link = Arc::new(TcpLink::new(
        local,
        config.link.peers.clone(),
        config.connect_timeout(),
    ));
    link.advertise(&config.link.capability_tag).await?;
    let (bound, listener) = link.listen(&config.listen_address(role)).await?;
    log::info!("Pairing link bound to {}", bound);

    let dispatcher = FailoverDispatcher::http(
        config.delivery.endpoints.clone(),
        config.request_timeout(),
    )?;
    for endpoint in dispatcher.endpoints() {
        log::info!("Endpoint {}: {}", endpoint.display_name, endpoint.url);
    }
    if config.delivery.probe_on_start {
        let probes = dispatcher.probe_all().await;
        let healthy = probes.iter().filter(|p| p.succeeded()).count();
        log::info!("{}/{} endpoint(s) answered the probe", healthy, probes.len());
    }

    log_capability(link.as_ref(), &config.link.capability_tag).await;

    let ui_state = RelayState::new();
    let mut events = ui_state.events();
    let relay = CompanionRelay::new(ui_state.clone(), dispatcher);
    let session = CompanionSession::start(
        link.clone(),
        relay,
        &config.link.capability_tag,
        config.poll_interval(role),
    );

    let ui_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => log::info!("UI event: {}", json),
                    Err(e) => log::warn!("Failed to encode UI event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("UI logger lagged; {} event(s) skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    session.stop().await;
    ui_logger.abort();
    link.withdraw(&config.link.capability_tag).await?;
    listener.abort();
    Ok(())
}
