//! In-memory storage backend

use async_trait::async_trait;
use dashmap::DashMap;
use exitnet_protocol::{Account, Connection, Node, NodeType, TunnelConfig};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::repo::{AccountStore, ConnectionStore, NodeStore, StorageError, TunnelConfigStore};

/// DashMap-backed store implementing every repository trait.
///
/// Connections sit behind a single lock so the one-ACTIVE-per-pair check and
/// the insert happen atomically.
pub struct MemoryStore {
    nodes: DashMap<String, Node>,
    connections: RwLock<Vec<Connection>>,
    tunnel_configs: DashMap<String, TunnelConfig>,
    last_octet: AtomicU32,
    accounts: DashMap<String, Account>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            connections: RwLock::new(Vec::new()),
            tunnel_configs: DashMap::new(),
            // .1 belongs to the server
            last_octet: AtomicU32::new(1),
            accounts: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn find_node(&self, wallet_address: &str) -> Result<Option<Node>, StorageError> {
        Ok(self.nodes.get(wallet_address).map(|n| n.value().clone()))
    }

    async fn upsert_node(&self, node: &Node) -> Result<(), StorageError> {
        self.nodes.insert(node.wallet_address.clone(), node.clone());
        Ok(())
    }

    async fn delete_node(&self, wallet_address: &str) -> Result<bool, StorageError> {
        Ok(self.nodes.remove(wallet_address).is_some())
    }

    async fn list_nodes(&self, node_type: Option<NodeType>) -> Result<Vec<Node>, StorageError> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|entry| node_type.is_none_or(|t| entry.value().node_type == t))
            .map(|entry| entry.value().clone())
            .collect();
        // DashMap iteration order is arbitrary
        nodes.sort_by(|a, b| a.wallet_address.cmp(&b.wallet_address));
        Ok(nodes)
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn insert_active_connection(&self, conn: &Connection) -> Result<(), StorageError> {
        let mut connections = self.connections.write();
        let duplicate = connections.iter().any(|c| {
            c.is_active()
                && c.host_wallet_address == conn.host_wallet_address
                && c.client_wallet_address == conn.client_wallet_address
        });
        if duplicate {
            return Err(StorageError::Conflict(format!(
                "active connection {} -> {} already exists",
                conn.client_wallet_address, conn.host_wallet_address
            )));
        }

        connections.push(conn.clone());
        Ok(())
    }

    async fn find_active_connection(
        &self,
        host: &str,
        client: &str,
    ) -> Result<Option<Connection>, StorageError> {
        let connections = self.connections.read();
        Ok(connections
            .iter()
            .find(|c| {
                c.is_active() && c.host_wallet_address == host && c.client_wallet_address == client
            })
            .cloned())
    }

    async fn find_active_connection_for_client(
        &self,
        client: &str,
    ) -> Result<Option<Connection>, StorageError> {
        let connections = self.connections.read();
        Ok(connections
            .iter()
            .find(|c| c.is_active() && c.client_wallet_address == client)
            .cloned())
    }

    async fn list_active_connections(&self, host: &str) -> Result<Vec<Connection>, StorageError> {
        let connections = self.connections.read();
        Ok(connections
            .iter()
            .filter(|c| c.is_active() && c.host_wallet_address == host)
            .cloned()
            .collect())
    }

    async fn update_connection(&self, conn: &Connection) -> Result<(), StorageError> {
        let key = conn.key();
        let mut connections = self.connections.write();
        let existing = connections
            .iter_mut()
            .find(|c| c.key() == key)
            .ok_or(StorageError::NotFound)?;
        *existing = conn.clone();
        Ok(())
    }
}

#[async_trait]
impl TunnelConfigStore for MemoryStore {
    async fn find_tunnel_config(&self, user_id: &str) -> Result<Option<TunnelConfig>, StorageError> {
        Ok(self.tunnel_configs.get(user_id).map(|c| c.value().clone()))
    }

    async fn find_tunnel_config_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<TunnelConfig>, StorageError> {
        Ok(self
            .tunnel_configs
            .iter()
            .find(|entry| entry.value().public_key == public_key)
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_tunnel_config(&self, config: &TunnelConfig) -> Result<(), StorageError> {
        self.tunnel_configs
            .insert(config.user_id.clone(), config.clone());
        Ok(())
    }

    async fn list_active_tunnel_configs(&self) -> Result<Vec<TunnelConfig>, StorageError> {
        let mut configs: Vec<TunnelConfig> = self
            .tunnel_configs
            .iter()
            .filter(|entry| entry.value().is_active)
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(configs)
    }

    async fn allocate_client_octet(&self) -> Result<u32, StorageError> {
        Ok(self.last_octet.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account(&self, wallet_address: &str) -> Result<Option<Account>, StorageError> {
        Ok(self.accounts.get(wallet_address).map(|a| a.value().clone()))
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), StorageError> {
        self.accounts
            .insert(account.wallet_address.clone(), account.clone());
        Ok(())
    }
}
