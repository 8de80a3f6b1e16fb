//! Tunnel interface provisioning
//!
//! The engine only ever talks to `TunnelProvisioner`; how peers reach the
//! kernel interface is up to the implementation.

use async_trait::async_trait;
use exitnet_protocol::{PeerHandshake, TunnelPeer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provisioner command failed: {0}")]
    CommandFailed(String),

    #[error("Provisioner unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected provisioner output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerMode {
    Simulation,
    Production,
}

#[async_trait]
pub trait TunnelProvisioner: Send + Sync {
    fn mode(&self) -> ProvisionerMode;

    async fn create_peer(&self, peer: &TunnelPeer) -> Result<(), ProvisionError>;

    async fn remove_peer(&self, public_key: &str) -> Result<(), ProvisionError>;

    async fn list_active_peers(&self) -> Result<Vec<PeerHandshake>, ProvisionError>;

    /// Replace the interface's peers with exactly `peers`
    async fn apply_full_peer_set(&self, peers: &[TunnelPeer]) -> Result<(), ProvisionError>;
}

/// In-process stand-in for a tunnel interface
#[derive(Default)]
pub struct SimulatedProvisioner {
    /// Map of public key -> peer
    peers: Mutex<BTreeMap<String, TunnelPeer>>,
    /// Map of public key -> last handshake (seconds)
    handshakes: Mutex<HashMap<String, u64>>,
    failing: AtomicBool,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn record_handshake(&self, public_key: &str, at_secs: u64) {
        self.handshakes.lock().insert(public_key.to_string(), at_secs);
    }

    pub fn peers(&self) -> Vec<TunnelPeer> {
        self.peers.lock().values().cloned().collect()
    }

    fn check(&self) -> Result<(), ProvisionError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ProvisionError::Unavailable("simulated interface down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TunnelProvisioner for SimulatedProvisioner {
    fn mode(&self) -> ProvisionerMode {
        ProvisionerMode::Simulation
    }

    async fn create_peer(&self, peer: &TunnelPeer) -> Result<(), ProvisionError> {
        self.check()?;
        self.peers.lock().insert(peer.public_key.clone(), peer.clone());
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<(), ProvisionError> {
        self.check()?;
        self.peers.lock().remove(public_key);
        Ok(())
    }

    async fn list_active_peers(&self) -> Result<Vec<PeerHandshake>, ProvisionError> {
        self.check()?;
        let handshakes = self.handshakes.lock();
        Ok(self
            .peers
            .lock()
            .keys()
            .map(|key| PeerHandshake {
                public_key: key.clone(),
                last_handshake_at: handshakes.get(key).copied(),
            })
            .collect())
    }

    async fn apply_full_peer_set(&self, peers: &[TunnelPeer]) -> Result<(), ProvisionError> {
        self.check()?;
        let mut current = self.peers.lock();
        current.clear();
        for peer in peers {
            current.insert(peer.public_key.clone(), peer.clone());
        }
        debug!("Simulated interface now has {} peers", current.len());
        Ok(())
    }
}
