//! `wg` command-line tunnel provisioner

use async_trait::async_trait;
use exitnet_core::{ProvisionError, ProvisionerMode, TunnelProvisioner};
use exitnet_protocol::{PeerHandshake, TunnelPeer};
use std::collections::HashSet;
use tokio::process::Command;
use tracing::{debug, info};

/// Drives a kernel WireGuard interface through the `wg` tool
pub struct WgCliProvisioner {
    interface: String,
}

impl WgCliProvisioner {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn wg(&self, args: &[&str]) -> Result<String, ProvisionError> {
        debug!("wg {}", args.join(" "));
        let output = Command::new("wg")
            .args(args)
            .output()
            .await
            .map_err(|e| ProvisionError::Unavailable(format!("wg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::CommandFailed(format!(
                "wg {} exited with {}: {}",
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn current_peers(&self) -> Result<HashSet<String>, ProvisionError> {
        let out = self.wg(&["show", &self.interface, "peers"]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl TunnelProvisioner for WgCliProvisioner {
    fn mode(&self) -> ProvisionerMode {
        ProvisionerMode::Production
    }

    async fn create_peer(&self, peer: &TunnelPeer) -> Result<(), ProvisionError> {
        let allowed = host_route(&peer.allowed_ip);
        self.wg(&[
            "set",
            &self.interface,
            "peer",
            &peer.public_key,
            "allowed-ips",
            &allowed,
        ])
        .await?;
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<(), ProvisionError> {
        self.wg(&["set", &self.interface, "peer", public_key, "remove"])
            .await?;
        Ok(())
    }

    async fn list_active_peers(&self) -> Result<Vec<PeerHandshake>, ProvisionError> {
        let out = self
            .wg(&["show", &self.interface, "latest-handshakes"])
            .await?;
        parse_handshakes(&out)
    }

    async fn apply_full_peer_set(&self, peers: &[TunnelPeer]) -> Result<(), ProvisionError> {
        let current = self.current_peers().await?;
        let wanted: HashSet<&str> = peers.iter().map(|p| p.public_key.as_str()).collect();

        let mut removed = 0;
        for key in current.iter().filter(|k| !wanted.contains(k.as_str())) {
            self.remove_peer(key).await?;
            removed += 1;
        }

        // `wg set` is idempotent, so existing peers get their address refreshed
        for peer in peers {
            self.create_peer(peer).await?;
        }

        info!(
            "Applied peer set on {}: peers={}, removed={}",
            self.interface,
            peers.len(),
            removed
        );
        Ok(())
    }
}

/// Address with a single-host prefix
fn host_route(ip: &str) -> String {
    let addr = ip.split('/').next().unwrap_or(ip);
    format!("{}/32", addr)
}

/// Parse `wg show <iface> latest-handshakes` output.
///
/// Each line is `<public key>\t<unix seconds>`; zero means no handshake yet.
pub fn parse_handshakes(output: &str) -> Result<Vec<PeerHandshake>, ProvisionError> {
    let mut peers = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(ts), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(ProvisionError::Parse(line.to_string()));
        };
        let ts: u64 = ts
            .parse()
            .map_err(|_| ProvisionError::Parse(line.to_string()))?;
        peers.push(PeerHandshake {
            public_key: key.to_string(),
            last_handshake_at: (ts > 0).then_some(ts),
        });
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handshakes() {
        let out = "abc=\t1700000000\nxyz=\t0\n\n";
        let peers = parse_handshakes(out).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].public_key, "abc=");
        assert_eq!(peers[0].last_handshake_at, Some(1_700_000_000));
        assert_eq!(peers[1].last_handshake_at, None);
    }

    #[test]
    fn test_parse_handshakes_empty() {
        assert!(parse_handshakes("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_handshakes_garbage() {
        assert!(matches!(
            parse_handshakes("abc= notanumber"),
            Err(ProvisionError::Parse(_))
        ));
        assert!(parse_handshakes("abc= 1 extra").is_err());
    }

    #[test]
    fn test_host_route() {
        assert_eq!(host_route("10.8.0.7/24"), "10.8.0.7/32");
        assert_eq!(host_route("10.8.0.7"), "10.8.0.7/32");
    }
}
