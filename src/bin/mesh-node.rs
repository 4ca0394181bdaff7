//! Mesh node daemon
//!
//! Wires the registries, transport, config bridge, and HTTP API together and
//! keeps running until interrupted.

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mesh_audio_streamer::{
    audio::scan_output_sinks,
    config::{AppConfig, ConfigBridge},
    entities::EntityRegistry,
    peers::{InboundMessage, LocalIdentity, PeerRegistry},
    protocol::ControllerMessage,
    signaling::{AppState, HttpServer, SignalingClient},
    transport::TcpTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mesh audio node");

    // Load or create config; the first run persists a fresh identity
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, path) = AppConfig::load(config_path.as_deref())?;
    let identity = LocalIdentity::new(config.uuid.clone(), config.name.clone());
    tracing::info!(
        uuid = %identity.uuid,
        instance = %identity.instance_uuid,
        "local peer identity"
    );

    // Peer session transport
    let bind: SocketAddr = format!(
        "{}:{}",
        config.transport.bind_address, config.transport.port
    )
    .parse()?;
    let transport = TcpTransport::bind(bind, config.transport.advertise_address.clone()).await?;

    // The registries; constructed once and shared by reference everywhere
    let registry = PeerRegistry::new(identity, transport.clone());
    let (config_tx, config_rx) = mpsc::unbounded_channel();
    let entities = Arc::new(EntityRegistry::new(config.uuid.clone(), config_tx));

    // Persist local entity changes back to the config file
    let bridge = ConfigBridge::new(config.clone(), path);
    let _bridge_handle = bridge.spawn(config_rx);

    // Device scan runs before the config replay so persisted device sinks
    // reconcile by device name instead of duplicating
    for sink in scan_output_sinks() {
        if let Err(e) = entities.add_sink(sink) {
            tracing::warn!("skipping detected device: {e}");
        }
    }
    entities.add_from_config(&config.sources, &config.sinks);

    // Feed entity gossip from peers into the registry
    spawn_controller_pump(registry.subscribe(), Arc::clone(&entities));

    let signaling = SignalingClient::new(Arc::clone(&registry), transport.clone());
    let state = Arc::new(AppState {
        peers: Arc::clone(&registry),
        entities: Arc::clone(&entities),
        signaling: Arc::clone(&signaling),
    });
    let _http_handle = HttpServer::new(config.http.clone(), state).start_background();
    tracing::info!(
        "HTTP API available at http://{}:{}",
        config.http.bind_address,
        config.http.port
    );

    // Join configured peers; failures are retried manually via the API
    for host in &config.auto_connect {
        match signaling.join_peer(host, None, false).await {
            Ok(peer) => tracing::info!(peer = %peer.uuid, %host, "joined configured peer"),
            Err(e) => tracing::warn!(%host, "could not join configured peer: {e}"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

/// Apply controller messages from the mesh to the entity registry.
fn spawn_controller_pump(
    mut messages: broadcast::Receiver<InboundMessage>,
    entities: Arc<EntityRegistry>,
) {
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(inbound) => {
                    let from = inbound.from;
                    let result = match inbound.message {
                        ControllerMessage::AddSource { source } => {
                            entities.add_source(source).map(|_| ())
                        }
                        ControllerMessage::AddSink { sink } => {
                            entities.add_sink(sink).map(|_| ())
                        }
                        ControllerMessage::RemoveSource { uuid } => {
                            entities.remove_source(&uuid);
                            Ok(())
                        }
                        ControllerMessage::RemoveSink { uuid } => {
                            entities.remove_sink(&uuid);
                            Ok(())
                        }
                        // discovery is consumed by the peer registry itself
                        ControllerMessage::PeerDiscovery { .. } => Ok(()),
                    };
                    if let Err(e) = result {
                        tracing::warn!(peer = %from, "rejected entity gossip: {e}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "controller pump lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
