//! Per-user WireGuard tunnel credentials

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    pub user_id: String,
    pub private_key: String,
    pub public_key: String,
    /// Client address in CIDR form, e.g. `10.8.0.2/24`
    pub client_ip: String,
    pub server_public_key: String,
    pub server_endpoint: String,
    pub server_ip: String,
    pub is_active: bool,
    pub allowed_ips: String,
    pub dns: String,
    pub persistent_keepalive: u16,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TunnelConfig {
    /// Client address without the prefix length
    pub fn client_address(&self) -> &str {
        self.client_ip.split('/').next().unwrap_or(&self.client_ip)
    }

    /// Peer entry the server needs for this client
    pub fn peer(&self) -> TunnelPeer {
        TunnelPeer {
            public_key: self.public_key.clone(),
            allowed_ip: format!("{}/32", self.client_address()),
        }
    }

    /// Render the client-side WireGuard configuration file
    pub fn render(&self) -> String {
        format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             Address = {}\n\
             DNS = {}\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}\n\
             AllowedIPs = {}\n\
             PersistentKeepalive = {}\n",
            self.private_key,
            self.client_ip,
            self.dns,
            self.server_public_key,
            self.server_endpoint,
            self.allowed_ips,
            self.persistent_keepalive,
        )
    }
}

/// A peer as pushed to the tunnel interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelPeer {
    pub public_key: String,
    pub allowed_ip: String,
}

/// A peer as reported by the tunnel interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHandshake {
    pub public_key: String,
    /// Seconds since the Unix epoch, `None` if the peer never completed a handshake
    pub last_handshake_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TunnelConfig {
        TunnelConfig {
            user_id: "u1".to_string(),
            private_key: "cpriv".to_string(),
            public_key: "cpub".to_string(),
            client_ip: "10.8.0.7/24".to_string(),
            server_public_key: "spub".to_string(),
            server_endpoint: "vpn.example.net:51820".to_string(),
            server_ip: "10.8.0.1".to_string(),
            is_active: true,
            allowed_ips: "0.0.0.0/0, ::/0".to_string(),
            dns: "1.1.1.1, 8.8.8.8".to_string(),
            persistent_keepalive: 25,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_peer_uses_host_route() {
        let peer = sample().peer();
        assert_eq!(peer.allowed_ip, "10.8.0.7/32");
        assert_eq!(peer.public_key, "cpub");
    }

    #[test]
    fn test_render_client_file() {
        let file = sample().render();
        assert!(file.starts_with("[Interface]\nPrivateKey = cpriv\n"));
        assert!(file.contains("Address = 10.8.0.7/24\n"));
        assert!(file.contains("Endpoint = vpn.example.net:51820\n"));
        assert!(file.ends_with("PersistentKeepalive = 25\n"));
    }
}
