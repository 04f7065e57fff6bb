//! LANShare node: advertise this device, discover peers, serve the API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{watch, RwLock};
use tracing_subscriber::EnvFilter;

use share_api::AppState;
use share_mesh::{DeviceRegistry, HttpPeerClient, PeerClient, PEER_FETCH_TIMEOUT};
use share_store::SessionStore;

#[derive(Debug, Clone, serde::Deserialize)]
struct ShareConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default = "default_true")]
    enable_mdns: bool,
}

fn default_port() -> u16 {
    8080
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_true() -> bool {
    true
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            enable_mdns: true,
        }
    }
}

fn load_config() -> Result<ShareConfig> {
    let config_path = PathBuf::from("lanshare.toml");
    let mut config = if config_path.exists() {
        let text = std::fs::read_to_string(&config_path).context("read lanshare.toml")?;
        toml::from_str(&text).context("parse lanshare.toml")?
    } else {
        ShareConfig::default()
    };

    if let Ok(port) = std::env::var("PORT") {
        config.port = port.parse().context("parse PORT")?;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let device_id = uuid::Uuid::new_v4().to_string();

    tracing::info!("LANShare starting...");
    tracing::info!("port      = {}", config.port);
    tracing::info!("data_dir  = {:?}", config.data_dir);
    tracing::info!("device_id = {device_id}");

    let store = SessionStore::open(&config.data_dir).context("open session store")?;
    let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Advertisement and discovery are best-effort: a device that cannot
    // register still works as a client of the devices it can reach.
    let mut daemon = None;
    let mut advertisement = None;
    let mut discovery_handle = None;
    if config.enable_mdns {
        match mdns_sd::ServiceDaemon::new() {
            Ok(d) => {
                match share_mesh::advertise(&d, &device_id, config.port) {
                    Ok(ad) => advertisement = Some(ad),
                    Err(e) => tracing::warn!("mDNS register failed: {e}"),
                }

                match share_mesh::start_discovery(
                    &d,
                    registry.clone(),
                    device_id.clone(),
                    shutdown_rx.clone(),
                ) {
                    Ok(handle) => {
                        tracing::info!("mDNS discovery started");
                        discovery_handle = Some(handle);
                    }
                    Err(e) => tracing::warn!("mDNS browse failed: {e}"),
                }

                daemon = Some(d);
            }
            Err(e) => tracing::warn!("mDNS daemon failed: {e}"),
        }
    }

    let peer_client: Arc<dyn PeerClient> =
        Arc::new(HttpPeerClient::new(PEER_FETCH_TIMEOUT).context("create peer client")?);

    let state = Arc::new(AppState {
        device_id,
        store,
        registry,
        peer_client,
    });

    let app = share_api::build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("bind to port {}", config.port))?;
    tracing::info!("HTTP API listening on 0.0.0.0:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        })
        .await
        .context("serve")?;

    // Withdraw presence before exiting so peers do not wait out the TTL.
    let _ = shutdown_tx.send(true);
    if let Some(ad) = advertisement.as_mut() {
        ad.withdraw();
    }
    if let Some(handle) = discovery_handle {
        handle.await.ok();
    }
    if let Some(d) = daemon {
        d.shutdown().ok();
    }

    Ok(())
}
