//! Network participants

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Role of a participant in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Offers bandwidth / tunnel exit capacity
    Host,
    /// Consumes a host's tunnel
    User,
}

impl NodeType {
    pub fn from_is_host(is_host: bool) -> Self {
        if is_host { NodeType::Host } else { NodeType::User }
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Active,
    Inactive,
    /// Administrative; never entered by the connect/disconnect lifecycle
    Suspended,
}

/// Reward classification based on cumulative earnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardTier {
    #[default]
    Starter,
    Pro,
    Elite,
}

/// Current-session metrics, reset on disconnect
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    /// Advertised bandwidth (MB/s)
    pub bandwidth: f64,
    /// Round-trip latency (ms)
    pub latency: f64,
    /// Packet loss (percent)
    pub packet_loss: f64,
}

/// Cumulative usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    /// Cumulative bytes shared
    pub bandwidth_shared: f64,
    /// Cumulative connected seconds
    pub connection_uptime: u64,
    /// Quality score, 0-100
    pub connection_quality: f64,
    /// Start of the current session
    pub start_time: Timestamp,
}

impl NodeStats {
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            bandwidth_shared: 0.0,
            connection_uptime: 0,
            connection_quality: 100.0,
            start_time: now,
        }
    }
}

/// Accrued reward balance
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRewards {
    pub daily_reward: f64,
    pub total_earned: f64,
    pub reward_tier: RewardTier,
    /// `None` until the first calculation; the node's creation time stands in
    pub last_reward_calculation: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub country: Option<String>,
    pub region: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Partial update supplied by a connecting node.
///
/// Only fields that are `Some` are merged into the stored node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInfo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub coordinates: Option<Coordinates>,
    /// Public address as observed by the transport
    pub ip: Option<String>,
    /// Measured bandwidth; estimated by the registry when absent
    pub bandwidth: Option<f64>,
    pub latency: Option<f64>,
}

impl NodeInfo {
    /// Merge the location fields that are present into `location`
    pub fn merge_location(&self, location: &mut Location) {
        if let Some(country) = &self.country {
            location.country = Some(country.clone());
        }
        if let Some(region) = &self.region {
            location.region = Some(region.clone());
        }
        if let Some(coordinates) = self.coordinates {
            location.coordinates = Some(coordinates);
        }
    }

    /// Location for a freshly created node, unknown fields filled in
    pub fn initial_location(&self) -> Location {
        Location {
            country: Some(self.country.clone().unwrap_or_else(|| "Unknown".to_string())),
            region: Some(self.region.clone().unwrap_or_else(|| "Unknown".to_string())),
            coordinates: Some(self.coordinates.unwrap_or_default()),
        }
    }
}

/// A network participant, keyed by wallet address.
///
/// `status` and `active` are persisted independently for compatibility with
/// existing consumers. Both are private: `set_status` is their only writer and
/// `repair_consistency` fixes documents that were written elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub wallet_address: String,
    pub node_type: NodeType,
    status: NodeStatus,
    active: bool,
    pub ip: Option<String>,
    /// HOST only
    pub connected_users: u32,
    /// USER only
    pub connected_to_host: Option<String>,
    pub performance: Performance,
    pub stats: NodeStats,
    pub rewards: NodeRewards,
    pub location: Location,
    pub last_seen: Option<Timestamp>,
    pub last_disconnected: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Node {
    /// Create an INACTIVE node with default statistics
    pub fn new(wallet_address: impl Into<String>, node_type: NodeType, now: Timestamp) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            node_type,
            status: NodeStatus::Inactive,
            active: false,
            ip: None,
            connected_users: 0,
            connected_to_host: None,
            performance: Performance::default(),
            stats: NodeStats::starting_at(now),
            rewards: NodeRewards::default(),
            location: Location::default(),
            last_seen: Some(now),
            last_disconnected: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_host(&self) -> bool {
        self.node_type == NodeType::Host
    }

    /// Set the status and its boolean mirror together
    pub fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
        self.active = status == NodeStatus::Active;
    }

    /// Whether `active == (status == ACTIVE)` holds
    pub fn is_consistent(&self) -> bool {
        self.active == (self.status == NodeStatus::Active)
    }

    /// Restore `active == (status == ACTIVE)` on a document loaded from storage.
    ///
    /// INACTIVE with `active == true` resolves towards ACTIVE; availability
    /// listing relies on that direction. Returns whether anything changed.
    pub fn repair_consistency(&mut self) -> bool {
        match (self.status, self.active) {
            (NodeStatus::Active, false) => {
                self.active = true;
                true
            }
            (NodeStatus::Inactive, true) => {
                self.status = NodeStatus::Active;
                true
            }
            (NodeStatus::Suspended, true) => {
                self.active = false;
                true
            }
            _ => false,
        }
    }

    /// Overwrite the raw pair without keeping them in sync.
    ///
    /// Only for migrating legacy documents and exercising repair paths.
    pub fn set_raw_status(&mut self, status: NodeStatus, active: bool) {
        self.status = status;
        self.active = active;
    }

    pub fn reward_snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            daily: self.rewards.daily_reward,
            total: self.rewards.total_earned,
        }
    }
}

/// Reward figures reported after a host disconnects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub daily: f64,
    pub total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_status_keeps_pair_in_sync() {
        let mut node = Node::new("w1", NodeType::Host, 0);
        assert!(node.is_consistent());

        node.set_status(NodeStatus::Active);
        assert!(node.is_active());

        node.set_status(NodeStatus::Suspended);
        assert!(!node.is_active());
        assert!(node.is_consistent());
    }

    #[test]
    fn test_repair_active_without_flag() {
        let mut node = Node::new("w1", NodeType::Host, 0);
        node.set_raw_status(NodeStatus::Active, false);

        assert!(node.repair_consistency());
        assert_eq!(node.status(), NodeStatus::Active);
        assert!(node.is_active());
    }

    #[test]
    fn test_repair_inactive_with_flag_becomes_active() {
        let mut node = Node::new("w1", NodeType::Host, 0);
        node.set_raw_status(NodeStatus::Inactive, true);

        assert!(node.repair_consistency());
        assert_eq!(node.status(), NodeStatus::Active);
        assert!(node.is_active());

        // Idempotent
        assert!(!node.repair_consistency());
    }

    #[test]
    fn test_node_info_merges_only_present_fields() {
        let mut location = Location {
            country: Some("FR".to_string()),
            region: Some("EU".to_string()),
            coordinates: None,
        };
        let info = NodeInfo {
            region: Some("EU-West".to_string()),
            ..Default::default()
        };

        info.merge_location(&mut location);
        assert_eq!(location.country.as_deref(), Some("FR"));
        assert_eq!(location.region.as_deref(), Some("EU-West"));
    }

    #[test]
    fn test_wire_format() {
        let mut node = Node::new("w1", NodeType::Host, 5);
        node.set_status(NodeStatus::Active);
        let json = serde_json::to_value(&node).unwrap();

        assert_eq!(json["walletAddress"], "w1");
        assert_eq!(json["nodeType"], "HOST");
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["active"], true);
        assert_eq!(json["rewards"]["rewardTier"], "STARTER");
    }
}
