//! exitnet Core - Node lifecycle and reward accrual engine
//!
//! This crate provides:
//! - `NodeRegistry`: connect / disconnect / status of HOST and USER nodes
//! - `ConnectionTracker`: HOST <-> USER sessions and their cascades
//! - `RewardEngine`: time-windowed reward accrual and daily claims
//! - `AvailabilityRanker`: scored listing of hosts for client discovery
//! - `TunnelConfigManager`: per-user WireGuard credentials
//!
//! Every mutation runs under a per-entity lock from `KeyedLocks`.

mod cached;
mod clock;
mod connections;
mod error;
mod locks;
mod provisioner;
mod ranker;
mod registry;
mod rewards;
mod tunnel;

pub use clock::*;
pub use connections::*;
pub use error::*;
pub use locks::*;
pub use provisioner::*;
pub use ranker::*;
pub use registry::{
    BandwidthEstimator, CountryCount, DisconnectOutcome, FixedBandwidth, NetworkHealth,
    NetworkStats, NodeRegistry, SimulatedBandwidth,
};
pub use rewards::*;
pub use tunnel::*;

use exitnet_storage::{Cache, Store};
use std::sync::Arc;

/// Dependencies shared by every component
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<KeyedLocks>,
    pub policy: Arc<RewardPolicy>,
}

pub struct EngineOptions {
    pub policy: RewardPolicy,
    pub tunnel: TunnelSettings,
    pub provisioner: Option<Arc<dyn TunnelProvisioner>>,
    pub bandwidth: Arc<dyn BandwidthEstimator>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: RewardPolicy::default(),
            tunnel: TunnelSettings::default(),
            provisioner: None,
            bandwidth: Arc::new(SimulatedBandwidth),
        }
    }
}

/// All components wired over one store, cache and clock
pub struct Engine {
    pub registry: NodeRegistry,
    pub connections: ConnectionTracker,
    pub rewards: RewardEngine,
    pub ranker: AvailabilityRanker,
    pub tunnels: TunnelConfigManager,
    ctx: EngineContext,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        let ctx = EngineContext {
            store,
            cache,
            clock,
            locks: Arc::new(KeyedLocks::new()),
            policy: Arc::new(options.policy),
        };

        Self {
            registry: NodeRegistry::new(ctx.clone(), options.bandwidth),
            connections: ConnectionTracker::new(ctx.clone()),
            rewards: RewardEngine::new(ctx.clone()),
            ranker: AvailabilityRanker::new(ctx.clone()),
            tunnels: TunnelConfigManager::new(ctx.clone(), options.tunnel, options.provisioner),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Drop lock entries for keys nobody is using
    pub fn prune_locks(&self) {
        self.ctx.locks.prune();
    }
}
