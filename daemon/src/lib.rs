//! exitnet Daemon
//!
//! Wires the engine to its storage, cache and tunnel backends and serves the
//! HTTP API.

pub mod api;
pub mod auth;
pub mod config;
pub mod metrics;
pub mod provisioner;

use anyhow::{Context, Result};
use exitnet_core::{
    Engine, EngineOptions, SimulatedBandwidth, SimulatedProvisioner, SystemClock,
    TunnelProvisioner,
};
use exitnet_crypto::TunnelKeyPair;
use exitnet_protocol::{MS_PER_SECOND, now_ms};
use exitnet_storage::postgres::PgStore;
use exitnet_storage::{Cache, MemoryCache, MemoryStore, NoopCache, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use api::AppState;
use auth::{Authenticator, IssuedToken};
use config::{DaemonConfig, StorageBackend};
use metrics::Metrics;
use provisioner::WgCliProvisioner;

/// Engine plus the in-memory cache, when one is used
pub struct Built {
    pub engine: Arc<Engine>,
    pub memory_cache: Option<Arc<MemoryCache>>,
}

/// Construct the engine described by `config`
pub async fn build_engine(config: &DaemonConfig) -> Result<Built> {
    let store: Arc<dyn Store> = match config.database.backend {
        StorageBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Postgres => {
            let store = PgStore::new(&config.database.url)
                .await
                .context("connecting to PostgreSQL")?;
            store.migrate().await.context("running migrations")?;
            info!("Using PostgreSQL store");
            Arc::new(store)
        }
    };

    let (cache, memory_cache): (Arc<dyn Cache>, _) = if config.cache.enabled {
        let cache = Arc::new(MemoryCache::new());
        (cache.clone() as Arc<dyn Cache>, Some(cache))
    } else {
        info!("Cache disabled, every lookup misses");
        (Arc::new(NoopCache), None)
    };

    let server_keys = match &config.tunnel.server_private_key {
        Some(key) => TunnelKeyPair::from_base64(key).context("decoding tunnel.server_private_key")?,
        None => {
            warn!("No tunnel server key configured, generated one for this run only");
            TunnelKeyPair::generate()
        }
    };

    let provisioner: Arc<dyn TunnelProvisioner> = if config.tunnel.simulate {
        info!("Tunnel provisioner: simulation");
        Arc::new(SimulatedProvisioner::new())
    } else {
        info!("Tunnel provisioner: wg on {}", config.tunnel.interface);
        Arc::new(WgCliProvisioner::new(config.tunnel.interface.clone()))
    };

    let options = EngineOptions {
        policy: config.rewards.clone(),
        tunnel: config.tunnel.settings(server_keys.public_key_base64()),
        provisioner: Some(provisioner),
        bandwidth: Arc::new(SimulatedBandwidth),
    };

    let engine = Engine::new(store, cache, Arc::new(SystemClock), options);
    Ok(Built {
        engine: Arc::new(engine),
        memory_cache,
    })
}

/// Build the application state shared by every request
pub fn app_state(config: &DaemonConfig, engine: Arc<Engine>) -> Result<AppState> {
    let auth = Authenticator::new(&config.security, config.is_development())
        .context("loading security settings")?;
    if config.is_development() {
        warn!(
            "Development mode: unauthenticated requests act as {}",
            config.security.dev_wallet_address
        );
    }

    Ok(AppState {
        engine,
        auth: Arc::new(auth),
        metrics: Arc::new(Metrics::new()),
    })
}

/// Sign an admin token offline with the configured secret.
///
/// Lets an operator obtain the first admin token, which then issues others
/// through `POST /api/admin/tokens`.
pub fn issue_admin_token(config: &DaemonConfig, wallet_address: &str) -> Result<IssuedToken> {
    let auth = Authenticator::new(&config.security, false).context("loading security settings")?;
    let issued = auth
        .issue_token(wallet_address, true, now_ms() / MS_PER_SECOND)
        .context("issuing admin token")?;
    info!("Issued admin token for {}", wallet_address.trim());
    Ok(issued)
}

/// Run the daemon until Ctrl-C
pub async fn run(config: DaemonConfig) -> Result<()> {
    let built = build_engine(&config).await?;
    let engine = built.engine;

    // Bring the interface in line with stored configs before serving
    if !engine.tunnels.resync().await {
        warn!("Initial tunnel resync failed, serving in degraded mode");
    }

    let metrics_handle = metrics::start_server(&config.monitoring);

    let cleanup_interval = Duration::from_secs(config.cache.cleanup_interval.max(1));
    let cleanup_engine = engine.clone();
    let memory_cache = built.memory_cache;
    let cleanup_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            if let Some(cache) = &memory_cache {
                cache.cleanup();
            }
            cleanup_engine.prune_locks();
        }
    });

    let state = app_state(&config, engine)?;
    let app = api::router(state);

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("API listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    // Cleanup
    cleanup_handle.abort();
    metrics_handle.abort();

    Ok(())
}
