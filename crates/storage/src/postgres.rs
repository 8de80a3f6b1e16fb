//! PostgreSQL backend storing entities as JSONB documents

use async_trait::async_trait;
use exitnet_protocol::{Account, Connection, ConnectionStatus, Node, NodeType, TunnelConfig};
use sqlx::types::Json;
use sqlx::{Executor, Pool, Postgres, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::repo::{AccountStore, ConnectionStore, NodeStore, StorageError, TunnelConfigStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    wallet_address VARCHAR(128) PRIMARY KEY,
    node_type VARCHAR(8) NOT NULL,
    doc JSONB NOT NULL,
    updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS nodes_node_type_idx ON nodes (node_type);

CREATE TABLE IF NOT EXISTS connections (
    id BIGSERIAL PRIMARY KEY,
    host_wallet_address VARCHAR(128) NOT NULL,
    client_wallet_address VARCHAR(128) NOT NULL,
    connected_at BIGINT NOT NULL,
    status VARCHAR(16) NOT NULL,
    doc JSONB NOT NULL,
    UNIQUE (host_wallet_address, client_wallet_address, connected_at)
);
CREATE UNIQUE INDEX IF NOT EXISTS connections_one_active_idx
    ON connections (host_wallet_address, client_wallet_address)
    WHERE status = 'ACTIVE';
CREATE INDEX IF NOT EXISTS connections_client_status_idx
    ON connections (client_wallet_address, status);

CREATE TABLE IF NOT EXISTS tunnel_configs (
    user_id VARCHAR(128) PRIMARY KEY,
    public_key TEXT NOT NULL,
    is_active BOOLEAN NOT NULL,
    doc JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS tunnel_ip_allocator (
    id INT PRIMARY KEY,
    last_octet INT NOT NULL
);
INSERT INTO tunnel_ip_allocator (id, last_octet) VALUES (1, 1) ON CONFLICT (id) DO NOTHING;

CREATE TABLE IF NOT EXISTS accounts (
    wallet_address VARCHAR(128) PRIMARY KEY,
    doc JSONB NOT NULL
);
"#;

/// PostgreSQL store implementing every repository trait
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await
            .map_err(map_db_error)?;

        Ok(Self { pool })
    }

    /// Initialize schema
    pub async fn migrate(&self) -> Result<(), StorageError> {
        // Plain string execution uses the simple protocol, which allows several statements
        self.pool.execute(SCHEMA).await.map_err(map_db_error)?;
        info!("PostgreSQL schema ready");
        Ok(())
    }
}

fn map_db_error(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db.message().to_string());
        }
    }
    StorageError::Database(e.to_string())
}

fn node_type_label(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Host => "HOST",
        NodeType::User => "USER",
    }
}

fn connection_status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Active => "ACTIVE",
        ConnectionStatus::Disconnected => "DISCONNECTED",
        ConnectionStatus::Failed => "FAILED",
    }
}

#[async_trait]
impl NodeStore for PgStore {
    async fn find_node(&self, wallet_address: &str) -> Result<Option<Node>, StorageError> {
        let doc = sqlx::query_scalar::<_, Json<Node>>(
            "SELECT doc FROM nodes WHERE wallet_address = $1",
        )
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(doc.map(|Json(node)| node))
    }

    async fn upsert_node(&self, node: &Node) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO nodes (wallet_address, node_type, doc, updated_at) VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (wallet_address) DO UPDATE \
             SET node_type = EXCLUDED.node_type, doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(&node.wallet_address)
        .bind(node_type_label(node.node_type))
        .bind(Json(node))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn delete_node(&self, wallet_address: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM nodes WHERE wallet_address = $1")
            .bind(wallet_address)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_nodes(&self, node_type: Option<NodeType>) -> Result<Vec<Node>, StorageError> {
        let docs = match node_type {
            Some(t) => {
                sqlx::query_scalar::<_, Json<Node>>(
                    "SELECT doc FROM nodes WHERE node_type = $1 ORDER BY wallet_address",
                )
                .bind(node_type_label(t))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar::<_, Json<Node>>("SELECT doc FROM nodes ORDER BY wallet_address")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_db_error)?;
        Ok(docs.into_iter().map(|Json(node)| node).collect())
    }
}

#[async_trait]
impl ConnectionStore for PgStore {
    async fn insert_active_connection(&self, conn: &Connection) -> Result<(), StorageError> {
        // connections_one_active_idx turns a second ACTIVE row into a unique violation
        sqlx::query(
            "INSERT INTO connections \
             (host_wallet_address, client_wallet_address, connected_at, status, doc) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&conn.host_wallet_address)
        .bind(&conn.client_wallet_address)
        .bind(conn.connected_at as i64)
        .bind(connection_status_label(conn.status))
        .bind(Json(conn))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn find_active_connection(
        &self,
        host: &str,
        client: &str,
    ) -> Result<Option<Connection>, StorageError> {
        let doc = sqlx::query_scalar::<_, Json<Connection>>(
            "SELECT doc FROM connections \
             WHERE host_wallet_address = $1 AND client_wallet_address = $2 AND status = 'ACTIVE'",
        )
        .bind(host)
        .bind(client)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(doc.map(|Json(conn)| conn))
    }

    async fn find_active_connection_for_client(
        &self,
        client: &str,
    ) -> Result<Option<Connection>, StorageError> {
        let doc = sqlx::query_scalar::<_, Json<Connection>>(
            "SELECT doc FROM connections \
             WHERE client_wallet_address = $1 AND status = 'ACTIVE' \
             ORDER BY connected_at DESC LIMIT 1",
        )
        .bind(client)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(doc.map(|Json(conn)| conn))
    }

    async fn list_active_connections(&self, host: &str) -> Result<Vec<Connection>, StorageError> {
        let docs = sqlx::query_scalar::<_, Json<Connection>>(
            "SELECT doc FROM connections \
             WHERE host_wallet_address = $1 AND status = 'ACTIVE' ORDER BY connected_at",
        )
        .bind(host)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(docs.into_iter().map(|Json(conn)| conn).collect())
    }

    async fn update_connection(&self, conn: &Connection) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE connections SET status = $4, doc = $5 \
             WHERE host_wallet_address = $1 AND client_wallet_address = $2 AND connected_at = $3",
        )
        .bind(&conn.host_wallet_address)
        .bind(&conn.client_wallet_address)
        .bind(conn.connected_at as i64)
        .bind(connection_status_label(conn.status))
        .bind(Json(conn))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl TunnelConfigStore for PgStore {
    async fn find_tunnel_config(&self, user_id: &str) -> Result<Option<TunnelConfig>, StorageError> {
        let doc = sqlx::query_scalar::<_, Json<TunnelConfig>>(
            "SELECT doc FROM tunnel_configs WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(doc.map(|Json(config)| config))
    }

    async fn find_tunnel_config_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<TunnelConfig>, StorageError> {
        let doc = sqlx::query_scalar::<_, Json<TunnelConfig>>(
            "SELECT doc FROM tunnel_configs WHERE public_key = $1",
        )
        .bind(public_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(doc.map(|Json(config)| config))
    }

    async fn upsert_tunnel_config(&self, config: &TunnelConfig) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO tunnel_configs (user_id, public_key, is_active, doc) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET public_key = EXCLUDED.public_key, is_active = EXCLUDED.is_active, doc = EXCLUDED.doc",
        )
        .bind(&config.user_id)
        .bind(&config.public_key)
        .bind(config.is_active)
        .bind(Json(config))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn list_active_tunnel_configs(&self) -> Result<Vec<TunnelConfig>, StorageError> {
        let docs = sqlx::query_scalar::<_, Json<TunnelConfig>>(
            "SELECT doc FROM tunnel_configs WHERE is_active ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(docs.into_iter().map(|Json(config)| config).collect())
    }

    async fn allocate_client_octet(&self) -> Result<u32, StorageError> {
        let octet: i32 = sqlx::query_scalar(
            "UPDATE tunnel_ip_allocator SET last_octet = last_octet + 1 WHERE id = 1 RETURNING last_octet",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;
        u32::try_from(octet).map_err(|_| StorageError::SerializationError(format!("bad octet {octet}")))
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_account(&self, wallet_address: &str) -> Result<Option<Account>, StorageError> {
        let doc = sqlx::query_scalar::<_, Json<Account>>(
            "SELECT doc FROM accounts WHERE wallet_address = $1",
        )
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(doc.map(|Json(account)| account))
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO accounts (wallet_address, doc) VALUES ($1, $2) \
             ON CONFLICT (wallet_address) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(&account.wallet_address)
        .bind(Json(account))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }
}
