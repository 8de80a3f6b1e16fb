//! Tunnel Config Manager
//!
//! One WireGuard credential set per user. Client addresses come from a
//! monotonic counter in the store and are never reused. After every change
//! the full set of active peers is pushed to the provisioner; a failed push
//! leaves the stored configs in place and shows up in `status()`.

use exitnet_crypto::TunnelKeyPair;
use exitnet_protocol::{TunnelConfig, Timestamp, validate_wallet_address};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::EngineContext;
use crate::error::CoreError;
use crate::provisioner::{ProvisionerMode, TunnelProvisioner};

/// Highest usable host octet in the /24
const MAX_CLIENT_OCTET: u32 = 254;

/// Peers that completed a handshake this recently count as connected
const HANDSHAKE_WINDOW_SECS: u64 = 180;

#[derive(Debug, Clone, PartialEq)]
pub struct TunnelSettings {
    pub server_public_key: String,
    /// `host:port` clients dial
    pub server_endpoint: String,
    pub server_ip: String,
    /// Client addresses are `{client_ip_base}{octet}`
    pub client_ip_base: String,
    pub dns: String,
    pub allowed_ips: String,
    pub persistent_keepalive: u16,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            server_public_key: String::new(),
            server_endpoint: "127.0.0.1:51820".to_string(),
            server_ip: "10.8.0.1".to_string(),
            client_ip_base: "10.8.0.".to_string(),
            dns: "1.1.1.1, 8.8.8.8".to_string(),
            allowed_ips: "0.0.0.0/0, ::/0".to_string(),
            persistent_keepalive: 25,
        }
    }
}

/// Provisioner health as seen by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub provisioner_present: bool,
    pub mode: Option<ProvisionerMode>,
    pub active_configs: usize,
    pub last_resync_at: Option<Timestamp>,
    pub last_resync_error: Option<String>,
    pub consecutive_failures: u64,
    /// False while the interface may disagree with stored configs
    pub in_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPeer {
    pub user_id: String,
    pub public_key: String,
    pub client_ip: String,
    /// Seconds since the Unix epoch
    pub last_handshake_at: u64,
}

#[derive(Debug, Default)]
struct ResyncHealth {
    last_resync_at: Option<Timestamp>,
    last_error: Option<String>,
    consecutive_failures: u64,
}

fn tunnel_lock_key(user_id: &str) -> String {
    format!("tunnel:{}", user_id)
}

pub struct TunnelConfigManager {
    ctx: EngineContext,
    settings: TunnelSettings,
    provisioner: Option<Arc<dyn TunnelProvisioner>>,
    health: RwLock<ResyncHealth>,
    /// Serialises resyncs so an older peer set never lands after a newer one
    resync_lock: Mutex<()>,
}

impl TunnelConfigManager {
    pub fn new(
        ctx: EngineContext,
        settings: TunnelSettings,
        provisioner: Option<Arc<dyn TunnelProvisioner>>,
    ) -> Self {
        Self {
            ctx,
            settings,
            provisioner,
            health: RwLock::new(ResyncHealth::default()),
            resync_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &TunnelSettings {
        &self.settings
    }

    pub async fn get_or_create(&self, user_id: &str) -> Result<TunnelConfig, CoreError> {
        let user_id = user_id.trim();
        validate_wallet_address("userId", user_id)?;

        let _guard = self.ctx.locks.lock(&tunnel_lock_key(user_id)).await;
        if let Some(config) = self.ctx.store.find_tunnel_config(user_id).await? {
            return Ok(config);
        }

        let config = self.create(user_id).await?;
        self.resync().await;
        Ok(config)
    }

    /// Replace a user's keys and address.
    ///
    /// The new config overwrites the old one only once an address and keys
    /// are in hand, so a failed allocation leaves the previous config and its
    /// peer in place.
    pub async fn regenerate(&self, user_id: &str) -> Result<TunnelConfig, CoreError> {
        let user_id = user_id.trim();
        validate_wallet_address("userId", user_id)?;

        let _guard = self.ctx.locks.lock(&tunnel_lock_key(user_id)).await;
        let previous = self.ctx.store.find_tunnel_config(user_id).await?;

        let config = self.create(user_id).await?;
        if let Some(previous) = previous {
            info!(
                "Tunnel config regenerated: user={}, ip {} -> {}",
                user_id, previous.client_ip, config.client_ip
            );
        }
        self.resync().await;
        Ok(config)
    }

    /// Disable a user's tunnel; the address stays allocated
    pub async fn deactivate(&self, user_id: &str) -> Result<TunnelConfig, CoreError> {
        let user_id = user_id.trim();
        validate_wallet_address("userId", user_id)?;

        let _guard = self.ctx.locks.lock(&tunnel_lock_key(user_id)).await;
        let mut config = self
            .ctx
            .store
            .find_tunnel_config(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("tunnel config", user_id))?;

        config.is_active = false;
        config.updated_at = self.ctx.clock.now_ms();
        self.ctx.store.upsert_tunnel_config(&config).await?;
        info!("Tunnel config deactivated: user={}", user_id);

        self.resync().await;
        Ok(config)
    }

    async fn create(&self, user_id: &str) -> Result<TunnelConfig, CoreError> {
        let octet = self.ctx.store.allocate_client_octet().await?;
        if octet > MAX_CLIENT_OCTET {
            warn!("Tunnel address pool exhausted (requested .{}) for {}", octet, user_id);
            return Err(CoreError::AddressPoolExhausted);
        }

        let keys = TunnelKeyPair::generate();
        let now = self.ctx.clock.now_ms();
        let config = TunnelConfig {
            user_id: user_id.to_string(),
            private_key: keys.private_key_base64(),
            public_key: keys.public_key_base64(),
            client_ip: format!("{}{}/24", self.settings.client_ip_base, octet),
            server_public_key: self.settings.server_public_key.clone(),
            server_endpoint: self.settings.server_endpoint.clone(),
            server_ip: self.settings.server_ip.clone(),
            is_active: true,
            allowed_ips: self.settings.allowed_ips.clone(),
            dns: self.settings.dns.clone(),
            persistent_keepalive: self.settings.persistent_keepalive,
            created_at: now,
            updated_at: now,
        };

        self.ctx.store.upsert_tunnel_config(&config).await?;
        info!("Tunnel config created: user={}, ip={}", user_id, config.client_ip);
        Ok(config)
    }

    /// Push every active peer to the provisioner.
    ///
    /// Failures are logged and recorded for `status()`, never returned.
    pub async fn resync(&self) -> bool {
        let Some(provisioner) = &self.provisioner else {
            return true;
        };
        let _resync = self.resync_lock.lock().await;

        let peers = match self.ctx.store.list_active_tunnel_configs().await {
            Ok(configs) => configs.iter().map(TunnelConfig::peer).collect::<Vec<_>>(),
            Err(e) => {
                error!("Tunnel resync could not load peers: {}", e);
                self.record_resync(Err(e.to_string()));
                return false;
            }
        };

        match provisioner.apply_full_peer_set(&peers).await {
            Ok(()) => {
                debug!("Tunnel peers resynced: count={}", peers.len());
                self.record_resync(Ok(()));
                true
            }
            Err(e) => {
                error!("Tunnel resync failed, interface may be stale: {}", e);
                self.record_resync(Err(e.to_string()));
                false
            }
        }
    }

    fn record_resync(&self, outcome: Result<(), String>) {
        let now = self.ctx.clock.now_ms();
        let mut health = self.health.write();
        health.last_resync_at = Some(now);
        match outcome {
            Ok(()) => {
                health.last_error = None;
                health.consecutive_failures = 0;
            }
            Err(e) => {
                health.last_error = Some(e);
                health.consecutive_failures += 1;
            }
        }
    }

    pub async fn status(&self) -> Result<TunnelStatus, CoreError> {
        let active_configs = self.ctx.store.list_active_tunnel_configs().await?.len();
        let health = self.health.read();
        Ok(TunnelStatus {
            provisioner_present: self.provisioner.is_some(),
            mode: self.provisioner.as_ref().map(|p| p.mode()),
            active_configs,
            last_resync_at: health.last_resync_at,
            last_resync_error: health.last_error.clone(),
            consecutive_failures: health.consecutive_failures,
            in_sync: health.last_error.is_none(),
        })
    }

    /// Peers with a recent handshake, mapped back to their users
    pub async fn connected_peers(&self) -> Result<Vec<ConnectedPeer>, CoreError> {
        let Some(provisioner) = &self.provisioner else {
            return Ok(Vec::new());
        };

        let handshakes = provisioner
            .list_active_peers()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        let now_secs = self.ctx.clock.now_ms() / 1000;

        let mut peers = Vec::new();
        for peer in handshakes {
            let Some(at) = peer.last_handshake_at else {
                continue;
            };
            if now_secs.saturating_sub(at) > HANDSHAKE_WINDOW_SECS {
                continue;
            }
            if let Some(config) = self
                .ctx
                .store
                .find_tunnel_config_by_public_key(&peer.public_key)
                .await?
            {
                peers.push(ConnectedPeer {
                    user_id: config.user_id,
                    public_key: peer.public_key,
                    client_ip: config.client_ip,
                    last_handshake_at: at,
                });
            }
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{START, engine_with_provisioner};
    use exitnet_storage::TunnelConfigStore;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let (engine, _clock, _store, prov) = engine_with_provisioner();
        let first = engine.tunnels.get_or_create("u1").await.unwrap();
        let again = engine.tunnels.get_or_create("u1").await.unwrap();

        assert_eq!(first, again);
        assert_eq!(first.client_ip, "10.8.0.2/24");
        assert_eq!(first.server_ip, "10.8.0.1");
        assert_eq!(first.public_key.len(), 44);
        assert!(first.is_active);
        assert_eq!(prov.peers(), vec![first.peer()]);
    }

    #[tokio::test]
    async fn test_sequential_allocation() {
        let (engine, _clock, _store, _prov) = engine_with_provisioner();
        let a = engine.tunnels.get_or_create("u1").await.unwrap();
        let b = engine.tunnels.get_or_create("u2").await.unwrap();
        assert_eq!(a.client_address(), "10.8.0.2");
        assert_eq!(b.client_address(), "10.8.0.3");
    }

    #[tokio::test]
    async fn test_regenerate_takes_new_address_and_keys() {
        let (engine, _clock, _store, prov) = engine_with_provisioner();
        let old = engine.tunnels.get_or_create("u1").await.unwrap();
        let new = engine.tunnels.regenerate("u1").await.unwrap();

        assert_ne!(old.public_key, new.public_key);
        assert_eq!(new.client_ip, "10.8.0.3/24");
        assert_eq!(prov.peers(), vec![new.peer()]);
    }

    #[tokio::test]
    async fn test_deactivate_keeps_address_reserved() {
        let (engine, _clock, store, prov) = engine_with_provisioner();
        engine.tunnels.get_or_create("u1").await.unwrap();

        let config = engine.tunnels.deactivate("u1").await.unwrap();
        assert!(!config.is_active);
        assert!(prov.peers().is_empty());
        assert!(store.list_active_tunnel_configs().await.unwrap().is_empty());

        let next = engine.tunnels.get_or_create("u2").await.unwrap();
        assert_eq!(next.client_ip, "10.8.0.3/24");
    }

    #[tokio::test]
    async fn test_deactivate_unknown_user() {
        let (engine, _clock, _store, _prov) = engine_with_provisioner();
        let result = engine.tunnels.deactivate("nobody").await;
        assert!(matches!(result, Err(CoreError::NotFound { entity: "tunnel config", .. })));
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let (engine, _clock, store, _prov) = engine_with_provisioner();
        // Burn .2 through .254
        for _ in 2..=MAX_CLIENT_OCTET {
            store.allocate_client_octet().await.unwrap();
        }

        let result = engine.tunnels.get_or_create("late").await;
        assert!(matches!(result, Err(CoreError::AddressPoolExhausted)));
    }

    #[tokio::test]
    async fn test_regenerate_with_full_pool_keeps_previous_config() {
        let (engine, _clock, store, prov) = engine_with_provisioner();
        let original = engine.tunnels.get_or_create("u1").await.unwrap();
        // Burn .3 through .254
        for _ in 3..=MAX_CLIENT_OCTET {
            store.allocate_client_octet().await.unwrap();
        }

        let result = engine.tunnels.regenerate("u1").await;
        assert!(matches!(result, Err(CoreError::AddressPoolExhausted)));

        let stored = store.find_tunnel_config("u1").await.unwrap();
        assert_eq!(stored, Some(original.clone()));
        assert_eq!(prov.peers(), vec![original.peer()]);

        let status = engine.tunnels.status().await.unwrap();
        assert!(status.in_sync);
        assert_eq!(status.active_configs, 1);
    }

    #[tokio::test]
    async fn test_resync_failure_is_surfaced_not_raised() {
        let (engine, _clock, _store, prov) = engine_with_provisioner();
        prov.set_failing(true);

        let config = engine.tunnels.get_or_create("u1").await.unwrap();
        assert!(config.is_active);

        let status = engine.tunnels.status().await.unwrap();
        assert!(!status.in_sync);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_resync_error.is_some());
        assert_eq!(status.mode, Some(ProvisionerMode::Simulation));
        assert_eq!(status.active_configs, 1);

        prov.set_failing(false);
        assert!(engine.tunnels.resync().await);
        let status = engine.tunnels.status().await.unwrap();
        assert!(status.in_sync);
        assert_eq!(status.last_resync_at, Some(START));
        assert_eq!(prov.peers(), vec![config.peer()]);
    }

    #[tokio::test]
    async fn test_connected_peers_window() {
        let (engine, _clock, _store, prov) = engine_with_provisioner();
        let a = engine.tunnels.get_or_create("u1").await.unwrap();
        let b = engine.tunnels.get_or_create("u2").await.unwrap();
        engine.tunnels.get_or_create("u3").await.unwrap();

        let now_secs = START / 1000;
        prov.record_handshake(&a.public_key, now_secs - 60);
        prov.record_handshake(&b.public_key, now_secs - 600);

        let peers = engine.tunnels.connected_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].user_id, "u1");
        assert_eq!(peers[0].client_ip, a.client_ip);
    }

    #[tokio::test]
    async fn test_without_provisioner() {
        let (engine, _clock, _store) = crate::testing::engine();
        engine.tunnels.get_or_create("u1").await.unwrap();

        let status = engine.tunnels.status().await.unwrap();
        assert!(!status.provisioner_present);
        assert!(status.in_sync);
        assert!(engine.tunnels.connected_peers().await.unwrap().is_empty());
    }
}
