//! HOST <-> USER sessions

use serde::{Deserialize, Serialize};

use crate::time::{Timestamp, elapsed_secs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Active,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    /// MB transferred
    pub total_bandwidth: f64,
    /// ms
    pub average_latency: f64,
    /// percent
    pub packet_loss: f64,
    /// 0-100
    pub connection_quality: f64,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self {
            total_bandwidth: 0.0,
            average_latency: 0.0,
            packet_loss: 0.0,
            connection_quality: 100.0,
        }
    }
}

/// Identity of a session: `(host, client, connected_at)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionKey {
    pub host_wallet_address: String,
    pub client_wallet_address: String,
    pub connected_at: Timestamp,
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.host_wallet_address, self.client_wallet_address, self.connected_at
        )
    }
}

/// A directed session between one HOST and one USER
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub host_wallet_address: String,
    pub client_wallet_address: String,
    pub status: ConnectionStatus,
    pub connected_at: Timestamp,
    pub disconnected_at: Option<Timestamp>,
    pub last_activity: Timestamp,
    pub metrics: ConnectionMetrics,
    /// Seconds; recomputed whenever the session becomes DISCONNECTED
    pub session_duration: u64,
}

impl Connection {
    /// Open a new ACTIVE session
    pub fn open(host: impl Into<String>, client: impl Into<String>, now: Timestamp) -> Self {
        Self {
            host_wallet_address: host.into(),
            client_wallet_address: client.into(),
            status: ConnectionStatus::Active,
            connected_at: now,
            disconnected_at: None,
            last_activity: now,
            metrics: ConnectionMetrics::default(),
            session_duration: 0,
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            host_wallet_address: self.host_wallet_address.clone(),
            client_wallet_address: self.client_wallet_address.clone(),
            connected_at: self.connected_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    /// Close the session and recompute its duration
    pub fn mark_disconnected(&mut self, now: Timestamp) {
        self.status = ConnectionStatus::Disconnected;
        self.disconnected_at = Some(now);
        self.last_activity = now;
        self.session_duration = self.session_duration_at(now);
    }

    /// Session length in seconds: closed sessions use `disconnected_at`,
    /// open ones are measured up to `now`
    pub fn session_duration_at(&self, now: Timestamp) -> u64 {
        match (self.status, self.disconnected_at) {
            (ConnectionStatus::Disconnected, Some(end)) => elapsed_secs(self.connected_at, end),
            _ => elapsed_secs(self.connected_at, now),
        }
    }
}

/// A client as listed to its host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub connection_id: String,
    pub wallet_address: String,
    pub ip: String,
    pub connected_since: Timestamp,
    pub last_activity: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_duration_on_disconnect() {
        let mut conn = Connection::open("host", "client", 10_000);
        assert!(conn.is_active());
        assert_eq!(conn.session_duration_at(12_500), 2);

        conn.mark_disconnected(75_000);
        assert_eq!(conn.status, ConnectionStatus::Disconnected);
        assert_eq!(conn.session_duration, 65);
        // Closed sessions stop growing
        assert_eq!(conn.session_duration_at(1_000_000), 65);
    }

    #[test]
    fn test_key_display() {
        let conn = Connection::open("h", "c", 42);
        assert_eq!(conn.key().to_string(), "h:c:42");
    }
}
