//! Engine scenarios over the in-memory backend
//!
//! Time is driven by a `ManualClock`, so hour and day windows are crossed
//! without sleeping.

use exitnet_core::{
    Clock, CoreError, Engine, EngineOptions, FixedBandwidth, ManualClock, SimulatedProvisioner,
};
use exitnet_protocol::{MS_PER_DAY, MS_PER_HOUR, NodeInfo, NodeStatus, RewardTier};
use exitnet_storage::{MemoryStore, NoopCache, NodeStore};
use futures::future::join_all;
use std::sync::Arc;

const START: u64 = 1_700_000_000_000;

struct Harness {
    engine: Engine,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    provisioner: Arc<SimulatedProvisioner>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(MemoryStore::new());
    let provisioner = Arc::new(SimulatedProvisioner::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(NoopCache),
        clock.clone(),
        EngineOptions {
            bandwidth: Arc::new(FixedBandwidth(50.0)),
            provisioner: Some(provisioner.clone()),
            ..Default::default()
        },
    );
    Harness {
        engine,
        clock,
        store,
        provisioner,
    }
}

fn info(bandwidth: f64, latency: f64) -> NodeInfo {
    NodeInfo {
        bandwidth: Some(bandwidth),
        latency: Some(latency),
        ..Default::default()
    }
}

fn close_to(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_host_connect_disconnect_round_trip() {
    let h = harness();

    let node = h
        .engine
        .registry
        .connect("w1", NodeInfo::default(), true)
        .await
        .unwrap();
    assert_eq!(node.status(), NodeStatus::Active);
    assert!(node.is_active());
    assert_eq!(node.performance.bandwidth, 50.0);

    h.clock.advance(2_000);
    let outcome = h.engine.registry.disconnect("w1").await.unwrap();
    assert_eq!(outcome.uptime_seconds, 2);

    let expected = 50.0 * 0.01 * (2.0 / 3600.0);
    assert!(close_to(outcome.reward_added, expected));

    let stored = h.store.find_node("w1").await.unwrap().unwrap();
    assert_eq!(stored.status(), NodeStatus::Inactive);
    assert!(!stored.is_active());
    assert!(close_to(stored.rewards.total_earned, expected));
    assert_eq!(stored.performance.bandwidth, 0.0);
    assert_eq!(stored.stats.connection_uptime, 2);
}

#[tokio::test]
async fn test_user_disconnect_deletes_node() {
    let h = harness();

    h.engine
        .registry
        .connect("w2", NodeInfo::default(), false)
        .await
        .unwrap();
    let outcome = h.engine.registry.disconnect("w2").await.unwrap();
    assert_eq!(outcome.reward_added, 0.0);
    assert!(outcome.rewards.is_none());

    assert!(matches!(
        h.engine.registry.status("w2").await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_status_repairs_divergent_node() {
    let h = harness();

    h.engine
        .registry
        .connect("w3", NodeInfo::default(), true)
        .await
        .unwrap();
    let mut node = h.store.find_node("w3").await.unwrap().unwrap();
    node.set_raw_status(NodeStatus::Inactive, true);
    h.store.upsert_node(&node).await.unwrap();

    let repaired = h.engine.registry.status("w3").await.unwrap();
    assert_eq!(repaired.status(), NodeStatus::Active);
    assert!(repaired.is_active());
}

#[tokio::test]
async fn test_connection_cascade() {
    let h = harness();

    h.engine
        .registry
        .connect("hostA", NodeInfo::default(), true)
        .await
        .unwrap();
    h.engine.connections.open("hostA", "clientB").await.unwrap();

    let host = h.engine.registry.status("hostA").await.unwrap();
    assert_eq!(host.connected_users, 1);
    let client = h.engine.registry.status("clientB").await.unwrap();
    assert_eq!(client.connected_to_host.as_deref(), Some("hostA"));

    let clients = h.engine.connections.list_active("hostA").await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].wallet_address, "clientB");

    h.clock.advance(30_000);
    let closed = h.engine.connections.close("hostA", "clientB").await.unwrap();
    assert_eq!(closed.session_duration_at(h.clock.now_ms()), 30);

    // A second close finds nothing and leaves the counter at zero
    assert!(matches!(
        h.engine.connections.close("hostA", "clientB").await,
        Err(CoreError::NotFound { .. })
    ));
    let host = h.engine.registry.status("hostA").await.unwrap();
    assert_eq!(host.connected_users, 0);

    let client = h.engine.registry.status("clientB").await.unwrap();
    assert_eq!(client.status(), NodeStatus::Inactive);
    assert!(client.connected_to_host.is_none());
}

#[tokio::test]
async fn test_duplicate_active_connection_conflicts() {
    let h = harness();

    h.engine
        .registry
        .connect("hostA", NodeInfo::default(), true)
        .await
        .unwrap();
    h.engine.connections.open("hostA", "clientB").await.unwrap();

    assert!(matches!(
        h.engine.connections.open("hostA", "clientB").await,
        Err(CoreError::Conflict(_))
    ));
    let host = h.engine.registry.status("hostA").await.unwrap();
    assert_eq!(host.connected_users, 1);
}

#[tokio::test]
async fn test_concurrent_opens_keep_count() {
    let h = harness();

    h.engine
        .registry
        .connect("hub", NodeInfo::default(), true)
        .await
        .unwrap();

    let clients: Vec<String> = (0..20).map(|i| format!("client-{}", i)).collect();
    let results = join_all(
        clients
            .iter()
            .map(|c| h.engine.connections.open("hub", c)),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let host = h.engine.registry.status("hub").await.unwrap();
    assert_eq!(host.connected_users, 20);

    let results = join_all(
        clients
            .iter()
            .map(|c| h.engine.connections.close_for_client(c)),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let host = h.engine.registry.status("hub").await.unwrap();
    assert_eq!(host.connected_users, 0);
}

#[tokio::test]
async fn test_rewards_throttled_and_monotonic() {
    let h = harness();

    h.engine
        .registry
        .connect("earner", NodeInfo::default(), true)
        .await
        .unwrap();

    h.clock.advance(2 * MS_PER_HOUR);
    let first = h.engine.rewards.calculate("earner").await.unwrap();
    assert!(first.daily_reward > 0.0);
    assert!(first.total_earned > 0.0);
    assert_eq!(first.reward_tier, RewardTier::Starter);

    // Within the hour the stored figure is returned unchanged
    h.clock.advance(10 * 60 * 1000);
    let second = h.engine.rewards.calculate("earner").await.unwrap();
    assert_eq!(second.daily_reward, first.daily_reward);
    assert_eq!(second.total_earned, first.total_earned);

    h.clock.advance(3 * MS_PER_HOUR);
    let third = h.engine.rewards.calculate("earner").await.unwrap();
    assert!(third.total_earned >= second.total_earned);
}

#[tokio::test]
async fn test_user_rewards_are_zero() {
    let h = harness();

    h.engine
        .registry
        .connect("plain-user", NodeInfo::default(), false)
        .await
        .unwrap();
    h.clock.advance(5 * MS_PER_HOUR);

    let result = h.engine.rewards.calculate("plain-user").await.unwrap();
    assert_eq!(result.daily_reward, 0.0);
    assert_eq!(result.total_earned, 0.0);
    assert!(result.message.is_some());
}

#[tokio::test]
async fn test_claim_gate() {
    let h = harness();

    h.engine
        .registry
        .connect("claimer", NodeInfo::default(), true)
        .await
        .unwrap();
    h.clock.advance(6 * MS_PER_HOUR);

    let receipt = h.engine.rewards.claim("claimer").await.unwrap();
    assert!(receipt.claimed_amount > 0.0);
    assert_eq!(receipt.next_claim_time, h.clock.now_ms() + MS_PER_DAY);

    h.clock.advance(MS_PER_HOUR);
    match h.engine.rewards.claim("claimer").await {
        Err(CoreError::ClaimTooSoon {
            remaining,
            next_claim_at,
        }) => {
            assert_eq!(remaining.as_millis() as u64, 23 * MS_PER_HOUR);
            assert_eq!(next_claim_at, receipt.next_claim_time);
        }
        other => panic!("expected ClaimTooSoon, got {:?}", other.map(|r| r.claimed_amount)),
    }

    h.clock.advance(23 * MS_PER_HOUR);
    let again = h.engine.rewards.claim("claimer").await.unwrap();
    assert!(again.total_rewards_claimed >= receipt.total_rewards_claimed);

    let overview = h.engine.rewards.claim_status("claimer").await.unwrap();
    assert_eq!(overview.claim_history.len(), 2);
    assert!(!overview.can_claim);
}

#[tokio::test]
async fn test_ranking_prefers_healthy_host() {
    let h = harness();

    h.engine
        .registry
        .connect("hostB", info(10.0, 190.0), true)
        .await
        .unwrap();
    let mut b = h.store.find_node("hostB").await.unwrap().unwrap();
    b.connected_users = 9;
    h.store.upsert_node(&b).await.unwrap();

    h.clock.advance(MS_PER_DAY);
    h.engine
        .registry
        .connect("hostA", info(100.0, 10.0), true)
        .await
        .unwrap();

    let ranked = h.engine.ranker.list_available().await.unwrap();
    let order: Vec<&str> = ranked.iter().map(|n| n.wallet_address.as_str()).collect();
    assert_eq!(order, vec!["hostA", "hostB"]);
    assert!(ranked[0].score > ranked[1].score);
}

#[tokio::test]
async fn test_ranking_drops_stale_hosts() {
    let h = harness();

    h.engine
        .registry
        .connect("gone", NodeInfo::default(), true)
        .await
        .unwrap();
    h.engine.registry.disconnect("gone").await.unwrap();

    // Freshly disconnected hosts stay listed for half an hour
    assert_eq!(h.engine.ranker.list_available().await.unwrap().len(), 1);

    h.clock.advance(31 * 60 * 1000);
    assert!(h.engine.ranker.list_available().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tunnel_config_lifecycle() {
    let h = harness();

    let first = h.engine.tunnels.get_or_create("alice").await.unwrap();
    let second = h.engine.tunnels.get_or_create("bob").await.unwrap();
    assert_eq!(first.client_address(), "10.8.0.2");
    assert_eq!(second.client_address(), "10.8.0.3");
    assert_eq!(h.provisioner.peers().len(), 2);

    // Idempotent for an existing user
    let again = h.engine.tunnels.get_or_create("alice").await.unwrap();
    assert_eq!(again.public_key, first.public_key);

    let regenerated = h.engine.tunnels.regenerate("alice").await.unwrap();
    assert_ne!(regenerated.public_key, first.public_key);
    assert_eq!(regenerated.client_address(), "10.8.0.4");

    let deactivated = h.engine.tunnels.deactivate("bob").await.unwrap();
    assert!(!deactivated.is_active);
    let peers = h.provisioner.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].public_key, regenerated.public_key);

    let status = h.engine.tunnels.status().await.unwrap();
    assert!(status.in_sync);
    assert_eq!(status.active_configs, 1);
}

#[tokio::test]
async fn test_tunnel_resync_failure_is_reported() {
    let h = harness();

    h.provisioner.set_failing(true);
    let config = h.engine.tunnels.get_or_create("carol").await.unwrap();
    assert!(config.is_active);

    let status = h.engine.tunnels.status().await.unwrap();
    assert!(!status.in_sync);
    assert!(status.last_resync_error.is_some());
    assert_eq!(status.consecutive_failures, 1);

    h.provisioner.set_failing(false);
    assert!(h.engine.tunnels.resync().await);
    assert!(h.engine.tunnels.status().await.unwrap().in_sync);
}
