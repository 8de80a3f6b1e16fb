//! Reward Engine
//!
//! HOST nodes earn a daily rate derived from shared bandwidth and uptime,
//! scaled by quality, location and regional demand. The balance accrues
//! `daily_reward * elapsed_hours / 24` per recalculation, so `total_earned`
//! does not depend on how often it is polled. Claims are gated to once per
//! claim interval and pay out whatever has not been claimed yet.

use exitnet_protocol::{
    Account, MS_PER_HOUR, Node, NodeType, RewardClaim, RewardTier, Timestamp,
    validate_wallet_address,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::EngineContext;
use crate::cached;
use crate::error::CoreError;

/// Cumulative earnings above which a tier applies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub elite: f64,
    pub pro: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            elite: 5000.0,
            pro: 1000.0,
        }
    }
}

/// Every reward constant in one place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardPolicy {
    /// Reward per MB/s of shared bandwidth per day
    pub bandwidth_factor: f64,
    /// Reward per hour of cumulative uptime per day
    pub uptime_factor: f64,
    pub underserved_multiplier: f64,
    /// Used when no `demand:{region}` entry is cached
    pub default_demand_multiplier: f64,
    /// ISO country codes earning the underserved multiplier
    pub underserved_countries: Vec<String>,
    pub tiers: TierThresholds,
    pub claim_interval_ms: u64,
    /// Minimum spacing between recalculations of a non-zero rate
    pub recalculation_interval_ms: u64,
    pub cache_ttl_secs: u64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            bandwidth_factor: 0.01,
            uptime_factor: 0.005,
            underserved_multiplier: 1.2,
            default_demand_multiplier: 1.5,
            underserved_countries: vec!["AF".to_string(), "SA".to_string()],
            tiers: TierThresholds::default(),
            claim_interval_ms: exitnet_protocol::CLAIM_INTERVAL_MS,
            recalculation_interval_ms: MS_PER_HOUR,
            cache_ttl_secs: 300,
        }
    }
}

impl RewardPolicy {
    pub fn tier_for(&self, total_earned: f64) -> RewardTier {
        if total_earned > self.tiers.elite {
            RewardTier::Elite
        } else if total_earned > self.tiers.pro {
            RewardTier::Pro
        } else {
            RewardTier::Starter
        }
    }

    pub fn location_multiplier(&self, country: Option<&str>) -> f64 {
        match country {
            Some(c) if self.underserved_countries.iter().any(|u| u.eq_ignore_ascii_case(c)) => {
                self.underserved_multiplier
            }
            _ => 1.0,
        }
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardNodeStats {
    /// Cumulative seconds
    pub uptime: u64,
    pub bandwidth: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardBreakdown {
    pub uptime_bonus: f64,
    pub quality_multiplier: f64,
    pub location_multiplier: f64,
    pub demand_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardResult {
    pub wallet_address: String,
    pub daily_reward: f64,
    pub total_earned: f64,
    pub total_rewards: f64,
    pub reward_tier: RewardTier,
    pub node_stats: RewardNodeStats,
    pub breakdown: RewardBreakdown,
    pub last_calculation: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RewardResult {
    fn for_node(node: &Node, breakdown: RewardBreakdown, message: Option<&str>) -> Self {
        Self {
            wallet_address: node.wallet_address.clone(),
            daily_reward: node.rewards.daily_reward,
            total_earned: node.rewards.total_earned,
            total_rewards: node.rewards.total_earned,
            reward_tier: node.rewards.reward_tier,
            node_stats: RewardNodeStats {
                uptime: node.stats.connection_uptime,
                bandwidth: node.performance.bandwidth,
                quality: node.stats.connection_quality,
            },
            breakdown,
            last_calculation: node.rewards.last_reward_calculation,
            message: message.map(str::to_string),
        }
    }

    /// Result for a node that does not earn rewards
    fn zero(node: &Node) -> Self {
        let mut result = Self::for_node(
            node,
            RewardBreakdown::default(),
            Some("Rewards are only available for HOST nodes"),
        );
        result.daily_reward = 0.0;
        result.total_earned = 0.0;
        result.total_rewards = 0.0;
        result.reward_tier = RewardTier::Starter;
        result
    }
}

/// Outcome of a successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub wallet_address: String,
    pub claimed_amount: f64,
    pub total_rewards_claimed: f64,
    pub next_claim_time: Timestamp,
}

/// Claim eligibility and history for a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOverview {
    pub available_rewards: f64,
    pub total_rewards_claimed: f64,
    pub can_claim: bool,
    pub next_claim_time: Option<Timestamp>,
    pub claim_history: Vec<RewardClaim>,
    pub rewards: RewardResult,
}

fn rewards_key(wallet: &str) -> String {
    format!("rewards:{}", wallet)
}

fn demand_key(region: &str) -> String {
    format!("demand:{}", region)
}

pub struct RewardEngine {
    ctx: EngineContext,
}

impl RewardEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Current rewards for a wallet, served from cache when present
    pub async fn calculate(&self, wallet_address: &str) -> Result<RewardResult, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;

        if let Some(cached) =
            cached::get_json::<RewardResult>(self.ctx.cache.as_ref(), &rewards_key(wallet)).await
        {
            debug!("Rewards for {} served from cache", wallet);
            return Ok(cached);
        }

        let _guard = self.ctx.locks.lock(wallet).await;
        self.recalculate(wallet).await
    }

    /// Recompute and persist; the caller holds the wallet lock
    async fn recalculate(&self, wallet: &str) -> Result<RewardResult, CoreError> {
        let policy = &self.ctx.policy;
        let now = self.ctx.clock.now_ms();
        let mut node = self
            .ctx
            .store
            .find_node(wallet)
            .await?
            .ok_or_else(|| CoreError::not_found("node", wallet))?;

        if node.node_type != NodeType::Host {
            return Ok(RewardResult::zero(&node));
        }

        let since = node.rewards.last_reward_calculation.unwrap_or(node.created_at);
        let elapsed_ms = now.saturating_sub(since);
        let delta_hours = elapsed_ms as f64 / MS_PER_HOUR as f64;
        let breakdown = self.breakdown(&node).await;

        if elapsed_ms < policy.recalculation_interval_ms && node.rewards.daily_reward > 0.0 {
            return Ok(RewardResult::for_node(&node, breakdown, None));
        }

        let bandwidth = if node.stats.bandwidth_shared > 0.0 {
            node.stats.bandwidth_shared
        } else {
            node.performance.bandwidth
        };
        let daily_reward = (bandwidth * policy.bandwidth_factor + breakdown.uptime_bonus)
            * breakdown.quality_multiplier
            * breakdown.location_multiplier
            * breakdown.demand_multiplier;

        node.rewards.daily_reward = daily_reward;
        node.rewards.total_earned += daily_reward * (delta_hours / 24.0);
        node.rewards.reward_tier = policy.tier_for(node.rewards.total_earned);
        node.rewards.last_reward_calculation = Some(now);
        node.updated_at = now;
        self.ctx.store.upsert_node(&node).await?;

        let result = RewardResult::for_node(&node, breakdown, None);
        cached::set_json(
            self.ctx.cache.as_ref(),
            &rewards_key(wallet),
            &result,
            policy.cache_ttl(),
        )
        .await;

        debug!(
            "Rewards recalculated: wallet={}, daily={:.6}, total={:.6}, tier={:?}",
            wallet, daily_reward, node.rewards.total_earned, node.rewards.reward_tier
        );
        Ok(result)
    }

    async fn breakdown(&self, node: &Node) -> RewardBreakdown {
        let policy = &self.ctx.policy;
        let demand_multiplier = match node.location.region.as_deref() {
            Some(region) => {
                cached::get_json::<f64>(self.ctx.cache.as_ref(), &demand_key(region)).await
            }
            None => None,
        }
        .filter(|m| m.is_finite() && *m >= 0.0)
        .unwrap_or(policy.default_demand_multiplier);

        RewardBreakdown {
            uptime_bonus: node.stats.connection_uptime as f64 / 3600.0 * policy.uptime_factor,
            quality_multiplier: node.stats.connection_quality / 100.0,
            location_multiplier: policy.location_multiplier(node.location.country.as_deref()),
            demand_multiplier,
        }
    }

    /// Pay out the unclaimed balance, at most once per claim interval
    pub async fn claim(&self, wallet_address: &str) -> Result<ClaimReceipt, CoreError> {
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;

        let _guard = self.ctx.locks.lock(wallet).await;
        let now = self.ctx.clock.now_ms();
        let interval = self.ctx.policy.claim_interval_ms;

        let mut account = self
            .ctx
            .store
            .find_account(wallet)
            .await?
            .unwrap_or_else(|| Account::new(wallet, now));

        let wait_ms = account.claim_wait_ms(now, interval);
        if wait_ms > 0 {
            return Err(CoreError::ClaimTooSoon {
                remaining: Duration::from_millis(wait_ms),
                next_claim_at: now + wait_ms,
            });
        }

        let rewards = self.recalculate(wallet).await?;
        let amount = (rewards.total_rewards - account.total_rewards_claimed).max(0.0);

        account.record_claim(amount, now);
        self.ctx.store.upsert_account(&account).await?;
        cached::invalidate(self.ctx.cache.as_ref(), &rewards_key(wallet)).await;

        info!(
            "Rewards claimed: wallet={}, amount={:.6}, lifetime={:.6}",
            wallet, amount, account.total_rewards_claimed
        );
        Ok(ClaimReceipt {
            wallet_address: wallet.to_string(),
            claimed_amount: amount,
            total_rewards_claimed: account.total_rewards_claimed,
            next_claim_time: now + interval,
        })
    }

    pub async fn claim_status(&self, wallet_address: &str) -> Result<ClaimOverview, CoreError> {
        let wallet = wallet_address.trim();
        let rewards = self.calculate(wallet).await?;
        let now = self.ctx.clock.now_ms();

        let account = self
            .ctx
            .store
            .find_account(wallet)
            .await?
            .unwrap_or_else(|| Account::new(wallet, now));
        let interval = self.ctx.policy.claim_interval_ms;

        Ok(ClaimOverview {
            available_rewards: (rewards.total_rewards - account.total_rewards_claimed).max(0.0),
            total_rewards_claimed: account.total_rewards_claimed,
            can_claim: account.can_claim(now, interval),
            next_claim_time: account.last_reward_claim.map(|last| last + interval),
            claim_history: account.reward_claims,
            rewards,
        })
    }

    /// Override the demand multiplier for a region until `ttl` expires
    pub async fn set_demand_multiplier(
        &self,
        region: &str,
        multiplier: f64,
        ttl: Duration,
    ) -> Result<(), CoreError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(exitnet_protocol::ValidationError::MissingField("region").into());
        }
        exitnet_protocol::validate_metric("multiplier", Some(multiplier))?;

        // Unlike other cache writes this one is the whole operation, so failures surface
        self.ctx
            .cache
            .set(&demand_key(region), multiplier.to_string(), ttl)
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        info!("Demand multiplier set: region={}, multiplier={}", region, multiplier);
        Ok(())
    }
}
