//! finder-daemon: the contact exchange service.
//!
//! Single OS process running a Tokio async runtime. Gateways talk to it with
//! JSON-RPC over a Unix socket; periodic sweeps expire requests, purge
//! expired contact details and, optionally, rotate the encryption key.

mod commands;
mod config;
mod events;
mod rpc;
mod sweeps;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use finder_crypto::argon2id;
use finder_crypto::secret::{KekProtector, SecretProtector};
use finder_db::queries::settings;
use finder_db::SqliteStore;
use finder_exchange::clock::{Clock, SystemClock};
use finder_exchange::engine::EncryptionEngine;
use finder_exchange::events::EventBus;
use finder_exchange::service::{ContactExchangeService, ServicePorts};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub service: Arc<ContactExchangeService>,
    /// Also serves the post and user read models.
    pub store: Arc<SqliteStore>,
    pub config: DaemonConfig,
    pub event_bus: EventBus,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    pub fn new(
        config: DaemonConfig,
        store: Arc<SqliteStore>,
        protector: Arc<dyn SecretProtector>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let event_bus = EventBus::new(config.advanced.event_buffer);
        let engine = Arc::new(EncryptionEngine::new(
            store.clone(),
            store.clone(),
            protector,
            clock.clone(),
        ));
        let service = ContactExchangeService::new(
            ServicePorts {
                requests: store.clone(),
                posts: store.clone(),
                users: store.clone(),
                events: Arc::new(event_bus.clone()),
                engine,
                clock,
            },
            config.exchange.settings(),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            service: Arc::new(service),
            store,
            config,
            event_bus,
            shutdown_tx,
        })
    }
}

/// Key-at-rest protector from the configured passphrase, or a per-process
/// key when none is set.
fn load_protector(config: &DaemonConfig, store: &SqliteStore) -> anyhow::Result<Arc<dyn SecretProtector>> {
    let Ok(passphrase) = std::env::var(&config.keys.passphrase_env) else {
        warn!(
            env = %config.keys.passphrase_env,
            "no key passphrase set; using an ephemeral key, stored keys will not survive a restart"
        );
        return Ok(Arc::new(KekProtector::ephemeral()));
    };

    let salt_hex = store
        .with_conn(|c| {
            settings::get_or_insert_with(c, settings::KEK_SALT, || {
                hex::encode(argon2id::generate_salt())
            })
        })
        .context("loading key salt")?;
    let salt = hex::decode(salt_hex).context("stored key salt is not hex")?;
    let protector = KekProtector::from_passphrase(passphrase.as_bytes(), &salt)
        .context("deriving key-encryption key")?;
    Ok(Arc::new(protector))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.advanced.log_level))?,
        )
        .init();

    info!("finder daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("finder.db");
    let store = Arc::new(SqliteStore::open(&db_path).context("opening database")?);

    // 3. Key protection, then the service graph
    let protector = load_protector(&config, &store)?;
    let state = DaemonState::new(config, store, protector, Arc::new(SystemClock));

    // 4. Event log and sweeps
    let event_log = tokio::spawn(events::log_events(state.event_bus.subscribe()));
    let sweeps = tokio::spawn(sweeps::run(state.clone(), state.shutdown_tx.subscribe()));

    // 5. IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());
    info!("Starting JSON-RPC server on {:?}", socket_path);

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");
    let _ = state.shutdown_tx.send(());
    let _ = sweeps.await;
    event_log.abort();

    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
