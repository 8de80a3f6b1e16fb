//! Per-wallet reward claim ledger

use serde::{Deserialize, Serialize};

use crate::time::{MS_PER_DAY, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaim {
    pub amount: f64,
    pub timestamp: Timestamp,
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub wallet_address: String,
    pub last_reward_claim: Option<Timestamp>,
    pub total_rewards_claimed: f64,
    pub reward_claims: Vec<RewardClaim>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Account {
    pub fn new(wallet_address: impl Into<String>, now: Timestamp) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            last_reward_claim: None,
            total_rewards_claimed: 0.0,
            reward_claims: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Milliseconds left before the next claim is allowed, 0 when allowed now
    pub fn claim_wait_ms(&self, now: Timestamp, interval_ms: u64) -> u64 {
        match self.last_reward_claim {
            None => 0,
            Some(last) => interval_ms.saturating_sub(now.saturating_sub(last)),
        }
    }

    pub fn can_claim(&self, now: Timestamp, interval_ms: u64) -> bool {
        self.claim_wait_ms(now, interval_ms) == 0
    }

    /// Record a successful claim
    pub fn record_claim(&mut self, amount: f64, now: Timestamp) {
        self.last_reward_claim = Some(now);
        self.total_rewards_claimed += amount;
        self.reward_claims.push(RewardClaim {
            amount,
            timestamp: now,
            status: ClaimStatus::Success,
        });
        self.updated_at = now;
    }
}

/// Default claim interval
pub const CLAIM_INTERVAL_MS: u64 = MS_PER_DAY;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_window() {
        let mut account = Account::new("w", 0);
        assert!(account.can_claim(0, CLAIM_INTERVAL_MS));

        account.record_claim(5.0, 1_000);
        assert!(!account.can_claim(2_000, CLAIM_INTERVAL_MS));
        assert_eq!(account.claim_wait_ms(2_000, CLAIM_INTERVAL_MS), CLAIM_INTERVAL_MS - 1_000);
        assert!(account.can_claim(1_000 + CLAIM_INTERVAL_MS, CLAIM_INTERVAL_MS));
        assert_eq!(account.reward_claims.len(), 1);
    }

    #[test]
    fn test_wire_format_ignores_legacy_role() {
        let account = Account::new("w", 10);
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("role").is_none());
        assert_eq!(json["totalRewardsClaimed"], 0.0);

        // Documents written before roles moved to the token claim
        let legacy = serde_json::json!({
            "walletAddress": "w",
            "role": "admin",
            "lastRewardClaim": null,
            "totalRewardsClaimed": 2.5,
            "rewardClaims": [],
            "createdAt": 10,
            "updatedAt": 10,
        });
        let parsed: Account = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.total_rewards_claimed, 2.5);
    }
}
