//! Availability Ranker
//!
//! Lists HOST nodes a client may connect to, best first.

use exitnet_protocol::{Location, Node, NodeStatus, NodeType, Performance, Timestamp, MS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::EngineContext;
use crate::error::CoreError;
use crate::registry::within;

/// Recently seen or disconnected nodes stay listed for this long
pub const FRESHNESS_WINDOW_MS: u64 = 30 * 60 * 1000;

/// Score used for a metric the node has not reported
const UNREPORTED_SCORE: f64 = 0.5;

/// A host as presented to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredNode {
    pub wallet_address: String,
    pub ip: Option<String>,
    pub location: Location,
    pub performance: Performance,
    pub last_seen: Option<Timestamp>,
    pub connected_users: u32,
    pub status: NodeStatus,
    pub score: f64,
}

impl ScoredNode {
    fn new(node: &Node, score: f64) -> Self {
        Self {
            wallet_address: node.wallet_address.clone(),
            ip: node.ip.clone(),
            location: node.location.clone(),
            performance: node.performance,
            last_seen: node.last_seen,
            connected_users: node.connected_users,
            status: node.status(),
            score,
        }
    }
}

fn is_candidate(node: &Node, now: Timestamp) -> bool {
    node.status() == NodeStatus::Active
        || node.is_active()
        || within(node.last_seen, now, FRESHNESS_WINDOW_MS)
        || (node.status() == NodeStatus::Inactive
            && within(node.last_disconnected, now, FRESHNESS_WINDOW_MS))
}

fn is_listed(node: &Node, now: Timestamp) -> bool {
    node.status() == NodeStatus::Active || within(node.last_seen, now, FRESHNESS_WINDOW_MS)
}

/// Weighted availability score in `[0, 1]`, rounded to two decimals
pub fn score_node(node: &Node, now: Timestamp) -> f64 {
    let perf = &node.performance;

    let bandwidth = if perf.bandwidth > 0.0 {
        (perf.bandwidth / 100.0).min(1.0)
    } else {
        UNREPORTED_SCORE
    };
    let latency = if perf.latency > 0.0 {
        (1.0 - perf.latency / 200.0).max(0.0)
    } else {
        UNREPORTED_SCORE
    };
    let occupancy = (1.0 - node.connected_users as f64 / 10.0).max(0.0);
    let freshness = match node.last_seen {
        Some(seen) => (1.0 - now.saturating_sub(seen) as f64 / MS_PER_DAY as f64).max(0.0),
        None => 0.0,
    };

    let total = 0.3 * bandwidth.clamp(0.0, 1.0)
        + 0.3 * latency.clamp(0.0, 1.0)
        + 0.2 * occupancy.clamp(0.0, 1.0)
        + 0.2 * freshness.clamp(0.0, 1.0);
    (total * 100.0).round() / 100.0
}

pub struct AvailabilityRanker {
    ctx: EngineContext,
}

impl AvailabilityRanker {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn list_available(&self) -> Result<Vec<ScoredNode>, CoreError> {
        let now = self.ctx.clock.now_ms();
        let hosts = self.ctx.store.list_nodes(Some(NodeType::Host)).await?;

        let mut scored = Vec::new();
        for mut node in hosts {
            if !is_candidate(&node, now) {
                continue;
            }
            if node.repair_consistency() {
                self.persist_repair(&node.wallet_address).await?;
            }

            let score = score_node(&node, now);
            if is_listed(&node, now) {
                scored.push(ScoredNode::new(&node, score));
            }
        }

        // Stable: equal scores keep store order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        debug!("Listed {} available hosts", scored.len());
        Ok(scored)
    }

    /// Write back a repaired node, re-read under its lock
    async fn persist_repair(&self, wallet: &str) -> Result<(), CoreError> {
        let _guard = self.ctx.locks.lock(wallet).await;
        if let Some(mut node) = self.ctx.store.find_node(wallet).await? {
            if node.repair_consistency() {
                debug!("Repaired status/active mismatch for {}", wallet);
                self.ctx.store.upsert_node(&node).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{START, engine};
    use exitnet_storage::NodeStore;

    fn host(wallet: &str, bandwidth: f64, latency: f64, users: u32, last_seen: Timestamp) -> Node {
        let mut node = Node::new(wallet, NodeType::Host, 0);
        node.set_status(NodeStatus::Active);
        node.performance.bandwidth = bandwidth;
        node.performance.latency = latency;
        node.connected_users = users;
        node.last_seen = Some(last_seen);
        node
    }

    #[test]
    fn test_score_components() {
        let now = MS_PER_DAY;
        let best = host("a", 100.0, 10.0, 0, now);
        // 0.3 + 0.3 * 0.95 + 0.2 + 0.2 = 0.985
        assert!((score_node(&best, now) - 0.985).abs() <= 0.006);

        let worst = host("b", 10.0, 190.0, 9, 0);
        // 0.03 + 0.015 + 0.02 + 0
        assert!((score_node(&worst, now) - 0.065).abs() <= 0.006);
    }

    #[test]
    fn test_unreported_metrics_score_half() {
        let node = host("a", 0.0, 0.0, 10, 0);
        // 0.15 + 0.15 + 0 + 0
        assert_eq!(score_node(&node, MS_PER_DAY * 2), 0.3);
    }

    #[test]
    fn test_occupancy_clamped() {
        let node = host("a", 500.0, 400.0, 25, 10);
        // bandwidth 1, latency 0, occupancy 0, freshness 1
        assert_eq!(score_node(&node, 10), 0.5);
    }

    #[tokio::test]
    async fn test_ranking_order() {
        let (engine, _clock, store) = engine();
        let day_ago = START - MS_PER_DAY;
        store.upsert_node(&host("B", 10.0, 190.0, 9, day_ago)).await.unwrap();
        store.upsert_node(&host("A", 100.0, 10.0, 0, START)).await.unwrap();

        let listed = engine.ranker.list_available().await.unwrap();
        let wallets: Vec<&str> = listed.iter().map(|n| n.wallet_address.as_str()).collect();
        assert_eq!(wallets, vec!["A", "B"]);
        assert!(listed[0].score > listed[1].score);
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let (engine, _clock, store) = engine();

        // Inactive but seen ten minutes ago
        let mut recent = host("recent", 50.0, 50.0, 0, START - 10 * 60 * 1000);
        recent.set_status(NodeStatus::Inactive);
        store.upsert_node(&recent).await.unwrap();

        // Inactive and last seen an hour ago
        let mut stale = host("stale", 50.0, 50.0, 0, START - 60 * 60 * 1000);
        stale.set_status(NodeStatus::Inactive);
        store.upsert_node(&stale).await.unwrap();

        // Only recently disconnected: a candidate, but filtered out after scoring
        let mut dropped = host("dropped", 50.0, 50.0, 0, START - 60 * 60 * 1000);
        dropped.set_status(NodeStatus::Inactive);
        dropped.last_disconnected = Some(START - 5 * 60 * 1000);
        store.upsert_node(&dropped).await.unwrap();

        // Users are never listed
        let mut user = Node::new("user", NodeType::User, START);
        user.set_status(NodeStatus::Active);
        store.upsert_node(&user).await.unwrap();

        let listed = engine.ranker.list_available().await.unwrap();
        let wallets: Vec<&str> = listed.iter().map(|n| n.wallet_address.as_str()).collect();
        assert_eq!(wallets, vec!["recent"]);
    }

    #[tokio::test]
    async fn test_inconsistent_candidate_repaired_and_listed() {
        let (engine, _clock, store) = engine();
        let mut node = host("w1", 50.0, 50.0, 0, START - MS_PER_DAY);
        node.set_raw_status(NodeStatus::Inactive, true);
        store.upsert_node(&node).await.unwrap();

        let listed = engine.ranker.list_available().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, NodeStatus::Active);

        let stored = store.find_node("w1").await.unwrap().unwrap();
        assert!(stored.is_consistent());
        assert_eq!(stored.status(), NodeStatus::Active);
    }
}
