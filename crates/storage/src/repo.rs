//! Repository traits, one per entity

use async_trait::async_trait;
use exitnet_protocol::{Account, Connection, Node, NodeType, TunnelConfig};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found")]
    NotFound,

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Node documents keyed by wallet address
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn find_node(&self, wallet_address: &str) -> Result<Option<Node>, StorageError>;

    /// Insert or replace by wallet address (last writer wins)
    async fn upsert_node(&self, node: &Node) -> Result<(), StorageError>;

    /// Returns whether a record was removed
    async fn delete_node(&self, wallet_address: &str) -> Result<bool, StorageError>;

    /// All nodes, optionally restricted to one type
    async fn list_nodes(&self, node_type: Option<NodeType>) -> Result<Vec<Node>, StorageError>;
}

/// Connection documents keyed by `(host, client, connected_at)`
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Insert an ACTIVE connection.
    ///
    /// Fails with `Conflict` if the pair already has an ACTIVE connection.
    async fn insert_active_connection(&self, conn: &Connection) -> Result<(), StorageError>;

    async fn find_active_connection(
        &self,
        host: &str,
        client: &str,
    ) -> Result<Option<Connection>, StorageError>;

    async fn find_active_connection_for_client(
        &self,
        client: &str,
    ) -> Result<Option<Connection>, StorageError>;

    async fn list_active_connections(&self, host: &str) -> Result<Vec<Connection>, StorageError>;

    /// Replace an existing connection, `NotFound` if its key is unknown
    async fn update_connection(&self, conn: &Connection) -> Result<(), StorageError>;
}

/// Tunnel configs keyed by user id
#[async_trait]
pub trait TunnelConfigStore: Send + Sync {
    async fn find_tunnel_config(&self, user_id: &str) -> Result<Option<TunnelConfig>, StorageError>;

    async fn find_tunnel_config_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<TunnelConfig>, StorageError>;

    async fn upsert_tunnel_config(&self, config: &TunnelConfig) -> Result<(), StorageError>;

    async fn list_active_tunnel_configs(&self) -> Result<Vec<TunnelConfig>, StorageError>;

    /// Next host octet from a persisted monotonic counter; the first call returns 2.
    /// Octets are never handed out twice, even after configs are deleted.
    async fn allocate_client_octet(&self) -> Result<u32, StorageError>;
}

/// Reward claim accounts keyed by wallet address
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, wallet_address: &str) -> Result<Option<Account>, StorageError>;

    async fn upsert_account(&self, account: &Account) -> Result<(), StorageError>;
}

/// A backend that stores every entity
pub trait Store: NodeStore + ConnectionStore + TunnelConfigStore + AccountStore {}

impl<T> Store for T where T: NodeStore + ConnectionStore + TunnelConfigStore + AccountStore {}
