//! Connection Tracker
//!
//! HOST <-> USER sessions and the node fields that mirror them
//! (`connected_users` on the host, `connected_to_host` on the client).

use exitnet_protocol::{
    ClientSummary, Connection, Node, NodeStatus, NodeType, validate_wallet_address,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::EngineContext;
use crate::cached;
use crate::error::CoreError;

const CLIENT_LIST_TTL: Duration = Duration::from_secs(30);

fn client_list_key(host: &str) -> String {
    format!("connected_clients:{}", host)
}

pub struct ConnectionTracker {
    ctx: EngineContext,
}

impl ConnectionTracker {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Connect `client` to an ACTIVE host
    pub async fn open(&self, host: &str, client: &str) -> Result<Connection, CoreError> {
        let (host, client) = (host.trim(), client.trim());
        validate_wallet_address("hostWalletAddress", host)?;
        validate_wallet_address("walletAddress", client)?;
        if host == client {
            return Err(CoreError::Conflict(format!("{} cannot connect to itself", host)));
        }

        let _guard = self.ctx.locks.lock_pair(host, client).await;
        let now = self.ctx.clock.now_ms();

        let mut host_node = self
            .ctx
            .store
            .find_node(host)
            .await?
            .filter(|n| n.is_host())
            .ok_or_else(|| CoreError::not_found("host", host))?;
        host_node.repair_consistency();
        if host_node.status() != NodeStatus::Active {
            return Err(CoreError::not_found("host", host));
        }

        // Uniqueness is enforced here, before either node is touched
        let conn = Connection::open(host, client, now);
        self.ctx.store.insert_active_connection(&conn).await?;

        let mut client_node = match self.ctx.store.find_node(client).await? {
            Some(node) => node,
            None => Node::new(client, NodeType::User, now),
        };
        client_node.node_type = NodeType::User;
        client_node.set_status(NodeStatus::Active);
        client_node.connected_to_host = Some(host.to_string());
        client_node.last_seen = Some(now);
        client_node.updated_at = now;
        self.ctx.store.upsert_node(&client_node).await?;

        host_node.connected_users += 1;
        host_node.updated_at = now;
        self.ctx.store.upsert_node(&host_node).await?;

        cached::invalidate(self.ctx.cache.as_ref(), &client_list_key(host)).await;
        info!(
            "Client connected: client={}, host={}, host_users={}",
            client, host, host_node.connected_users
        );
        Ok(conn)
    }

    /// Close the ACTIVE session between `host` and `client`
    pub async fn close(&self, host: &str, client: &str) -> Result<Connection, CoreError> {
        let (host, client) = (host.trim(), client.trim());
        validate_wallet_address("hostWalletAddress", host)?;
        validate_wallet_address("walletAddress", client)?;

        let _guard = self.ctx.locks.lock_pair(host, client).await;
        let now = self.ctx.clock.now_ms();

        let mut conn = self
            .ctx
            .store
            .find_active_connection(host, client)
            .await?
            .ok_or_else(|| CoreError::not_found("connection", format!("{} -> {}", client, host)))?;
        conn.mark_disconnected(now);
        self.ctx.store.update_connection(&conn).await?;

        if let Some(mut host_node) = self.ctx.store.find_node(host).await? {
            host_node.connected_users = host_node.connected_users.saturating_sub(1);
            host_node.updated_at = now;
            self.ctx.store.upsert_node(&host_node).await?;
        }

        if let Some(mut client_node) = self.ctx.store.find_node(client).await? {
            client_node.connected_to_host = None;
            client_node.set_status(NodeStatus::Inactive);
            client_node.last_disconnected = Some(now);
            client_node.updated_at = now;
            self.ctx.store.upsert_node(&client_node).await?;
        }

        cached::invalidate(self.ctx.cache.as_ref(), &client_list_key(host)).await;
        info!(
            "Client disconnected: client={}, host={}, session={}s",
            client, host, conn.session_duration
        );
        Ok(conn)
    }

    /// Close whichever session `client` currently has open
    pub async fn close_for_client(&self, client: &str) -> Result<Connection, CoreError> {
        let client = client.trim();
        validate_wallet_address("walletAddress", client)?;

        let conn = self
            .ctx
            .store
            .find_active_connection_for_client(client)
            .await?
            .ok_or_else(|| CoreError::not_found("connection", client))?;
        // close() re-checks under the pair lock
        self.close(&conn.host_wallet_address, client).await
    }

    /// Clients with an ACTIVE session on `host`
    pub async fn list_active(&self, host: &str) -> Result<Vec<ClientSummary>, CoreError> {
        let host = host.trim();
        validate_wallet_address("walletAddress", host)?;

        let key = client_list_key(host);
        if let Some(clients) = cached::get_json::<Vec<ClientSummary>>(self.ctx.cache.as_ref(), &key).await {
            debug!("Connected clients for {} served from cache", host);
            return Ok(clients);
        }

        let connections = self.ctx.store.list_active_connections(host).await?;
        let mut clients = Vec::with_capacity(connections.len());
        for conn in connections {
            let ip = self
                .ctx
                .store
                .find_node(&conn.client_wallet_address)
                .await?
                .and_then(|n| n.ip)
                .unwrap_or_else(|| "Unknown".to_string());
            clients.push(ClientSummary {
                connection_id: conn.key().to_string(),
                wallet_address: conn.client_wallet_address.clone(),
                ip,
                connected_since: conn.connected_at,
                last_activity: conn.last_activity,
            });
        }

        cached::set_json(self.ctx.cache.as_ref(), &key, &clients, CLIENT_LIST_TTL).await;
        Ok(clients)
    }
}
