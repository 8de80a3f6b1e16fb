//! Node Registry
//!
//! Owns node lifecycle transitions (connect / disconnect) and keeps `status`
//! and `active` agreeing on every node it hands out.

use exitnet_protocol::{
    Node, NodeInfo, NodeStatus, NodeType, Performance, RewardSnapshot, Timestamp,
    elapsed_secs, validate_metric, validate_wallet_address,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::EngineContext;
use crate::error::CoreError;

/// Supplies a bandwidth figure when a connecting node does not report one
pub trait BandwidthEstimator: Send + Sync {
    /// MB/s
    fn estimate(&self, wallet_address: &str) -> f64;
}

/// Uniform random bandwidth in `[10, 110)`
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedBandwidth;

impl BandwidthEstimator for SimulatedBandwidth {
    fn estimate(&self, _wallet_address: &str) -> f64 {
        fastrand::f64() * 100.0 + 10.0
    }
}

/// Always reports the same bandwidth
#[derive(Debug, Clone, Copy)]
pub struct FixedBandwidth(pub f64);

impl BandwidthEstimator for FixedBandwidth {
    fn estimate(&self, _wallet_address: &str) -> f64 {
        self.0
    }
}

/// Result of a disconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectOutcome {
    pub wallet_address: String,
    pub node_type: NodeType,
    pub uptime_seconds: u64,
    /// Session reward credited to a HOST, zero for USER nodes
    pub reward_added: f64,
    /// Balance after the credit; `None` for deleted USER nodes
    pub rewards: Option<RewardSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryCount {
    pub country: String,
    pub count: usize,
}

/// Network-wide aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub host_nodes: usize,
    pub user_nodes: usize,
    /// Sum of advertised bandwidth over active nodes
    pub total_bandwidth: f64,
    /// Mean cumulative uptime in seconds
    pub average_uptime: f64,
    /// Mean latency over active nodes reporting one
    pub average_latency: f64,
    pub top_countries: Vec<CountryCount>,
    pub health: NetworkHealth,
}

/// Share of active nodes above which the network counts as healthy
const HEALTHY_ACTIVE_RATIO: f64 = 0.7;
const TOP_COUNTRIES: usize = 5;

pub struct NodeRegistry {
    ctx: EngineContext,
    bandwidth: Arc<dyn BandwidthEstimator>,
}

impl NodeRegistry {
    pub fn new(ctx: EngineContext, bandwidth: Arc<dyn BandwidthEstimator>) -> Self {
        Self { ctx, bandwidth }
    }

    /// Register or refresh a node and mark it ACTIVE
    pub async fn connect(
        &self,
        wallet_address: &str,
        info: NodeInfo,
        is_host: bool,
    ) -> Result<Node, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;
        validate_metric("bandwidth", info.bandwidth)?;
        validate_metric("latency", info.latency)?;

        let _guard = self.ctx.locks.lock(wallet).await;
        let now = self.ctx.clock.now_ms();
        let node_type = NodeType::from_is_host(is_host);

        let mut node = match self.ctx.store.find_node(wallet).await? {
            Some(mut node) => {
                node.node_type = node_type;
                info.merge_location(&mut node.location);
                node.stats.start_time = now;
                node
            }
            None => {
                let mut node = Node::new(wallet, node_type, now);
                node.location = info.initial_location();
                info!("New node registered: wallet={}, type={:?}", wallet, node_type);
                node
            }
        };

        node.set_status(NodeStatus::Active);
        node.performance.bandwidth = info
            .bandwidth
            .unwrap_or_else(|| self.bandwidth.estimate(wallet));
        if let Some(latency) = info.latency {
            node.performance.latency = latency;
        }
        if let Some(ip) = info.ip {
            node.ip = Some(ip);
        }
        node.last_seen = Some(now);
        node.updated_at = now;

        self.ctx.store.upsert_node(&node).await?;
        info!(
            "Node connected: wallet={}, type={:?}, bandwidth={:.2}",
            wallet, node_type, node.performance.bandwidth
        );
        Ok(node)
    }

    /// End a node's session.
    ///
    /// HOST nodes are credited for the session and kept; USER nodes are deleted.
    /// Uptime is measured from the last `connect`, so disconnecting a HOST that
    /// is already INACTIVE counts the time since that connect again, at zero
    /// bandwidth since `performance` was reset.
    pub async fn disconnect(&self, wallet_address: &str) -> Result<DisconnectOutcome, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;

        let _guard = self.ctx.locks.lock(wallet).await;
        let now = self.ctx.clock.now_ms();
        let mut node = self
            .ctx
            .store
            .find_node(wallet)
            .await?
            .ok_or_else(|| CoreError::not_found("node", wallet))?;

        let uptime_seconds = elapsed_secs(node.stats.start_time, now);
        // Credit uses the session bandwidth, read before performance is reset
        let session_bandwidth = node.performance.bandwidth;

        node.set_status(NodeStatus::Inactive);
        node.last_disconnected = Some(now);
        node.stats.connection_uptime += uptime_seconds;
        node.connected_users = 0;
        node.performance = Performance::default();
        node.updated_at = now;

        let outcome = match node.node_type {
            NodeType::Host => {
                let reward = session_bandwidth
                    * self.ctx.policy.bandwidth_factor
                    * (uptime_seconds as f64 / 3600.0);
                node.rewards.daily_reward += reward;
                node.rewards.total_earned += reward;
                self.ctx.store.upsert_node(&node).await?;

                DisconnectOutcome {
                    wallet_address: wallet.to_string(),
                    node_type: NodeType::Host,
                    uptime_seconds,
                    reward_added: reward,
                    rewards: Some(node.reward_snapshot()),
                }
            }
            NodeType::User => {
                self.ctx.store.delete_node(wallet).await?;
                DisconnectOutcome {
                    wallet_address: wallet.to_string(),
                    node_type: NodeType::User,
                    uptime_seconds,
                    reward_added: 0.0,
                    rewards: None,
                }
            }
        };

        info!(
            "Node disconnected: wallet={}, type={:?}, uptime={}s, reward={:.6}",
            wallet, outcome.node_type, uptime_seconds, outcome.reward_added
        );
        Ok(outcome)
    }

    /// Current node view, repaired and written back if it was inconsistent
    pub async fn status(&self, wallet_address: &str) -> Result<Node, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;

        let node = self
            .ctx
            .store
            .find_node(wallet)
            .await?
            .ok_or_else(|| CoreError::not_found("node", wallet))?;
        if node.is_consistent() {
            return Ok(node);
        }

        let _guard = self.ctx.locks.lock(wallet).await;
        let mut node = self
            .ctx
            .store
            .find_node(wallet)
            .await?
            .ok_or_else(|| CoreError::not_found("node", wallet))?;
        if node.repair_consistency() {
            debug!("Repaired status/active mismatch for {}", wallet);
            self.ctx.store.upsert_node(&node).await?;
        }
        Ok(node)
    }

    pub async fn reset_ip(&self, wallet_address: &str, ip: &str) -> Result<Node, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;

        let _guard = self.ctx.locks.lock(wallet).await;
        let mut node = self
            .ctx
            .store
            .find_node(wallet)
            .await?
            .ok_or_else(|| CoreError::not_found("node", wallet))?;

        node.ip = Some(ip.to_string());
        node.updated_at = self.ctx.clock.now_ms();
        self.ctx.store.upsert_node(&node).await?;
        Ok(node)
    }

    /// Store a reachability probe result and refresh `last_seen`
    pub async fn record_probe(&self, wallet_address: &str, latency: f64) -> Result<Node, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;
        validate_metric("latency", Some(latency))?;

        let _guard = self.ctx.locks.lock(wallet).await;
        let now = self.ctx.clock.now_ms();
        let mut node = self
            .ctx
            .store
            .find_node(wallet)
            .await?
            .ok_or_else(|| CoreError::not_found("node", wallet))?;

        node.performance.latency = latency;
        node.last_seen = Some(now);
        node.updated_at = now;
        self.ctx.store.upsert_node(&node).await?;
        Ok(node)
    }

    pub async fn network_stats(&self) -> Result<NetworkStats, CoreError> {
        let mut nodes = self.ctx.store.list_nodes(None).await?;
        for node in nodes.iter_mut() {
            node.repair_consistency();
        }
        Ok(aggregate(&nodes))
    }
}

fn aggregate(nodes: &[Node]) -> NetworkStats {
    let total_nodes = nodes.len();
    let active: Vec<&Node> = nodes.iter().filter(|n| n.is_active()).collect();
    let host_nodes = nodes.iter().filter(|n| n.is_host()).count();

    let total_bandwidth = active.iter().map(|n| n.performance.bandwidth).sum();
    let average_uptime = if total_nodes == 0 {
        0.0
    } else {
        nodes
            .iter()
            .map(|n| n.stats.connection_uptime as f64)
            .sum::<f64>()
            / total_nodes as f64
    };

    let latencies: Vec<f64> = active
        .iter()
        .map(|n| n.performance.latency)
        .filter(|l| *l > 0.0)
        .collect();
    let average_latency = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };

    let mut by_country: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        let country = node.location.country.as_deref().unwrap_or("Unknown");
        *by_country.entry(country).or_default() += 1;
    }
    let mut top_countries: Vec<CountryCount> = by_country
        .into_iter()
        .map(|(country, count)| CountryCount {
            country: country.to_string(),
            count,
        })
        .collect();
    top_countries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.country.cmp(&b.country)));
    top_countries.truncate(TOP_COUNTRIES);

    let health = if active.is_empty() {
        NetworkHealth::Critical
    } else if active.len() as f64 / total_nodes as f64 > HEALTHY_ACTIVE_RATIO {
        NetworkHealth::Healthy
    } else {
        NetworkHealth::Degraded
    };

    NetworkStats {
        total_nodes,
        active_nodes: active.len(),
        host_nodes,
        user_nodes: total_nodes - host_nodes,
        total_bandwidth,
        average_uptime,
        average_latency,
        top_countries,
        health,
    }
}

/// Whether `ts` lies within `window_ms` before `now`
pub(crate) fn within(ts: Option<Timestamp>, now: Timestamp, window_ms: u64) -> bool {
    ts.is_some_and(|ts| now.saturating_sub(ts) <= window_ms)
}
