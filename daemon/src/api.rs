//! HTTP API
//!
//! JSON over axum. Every response carries `success`; failures add `error`.

use crate::auth::{AuthError, Authenticator, Identity, IssuedToken};
use crate::metrics::{self, Metrics};
use axum::{
    Router,
    extract::{FromRequestParts, Json, Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use exitnet_core::{CoreError, Engine};
use exitnet_protocol::{
    MS_PER_SECOND, NodeInfo, TunnelConfig, ValidationError, validate_wallet_address,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default lifetime of an operator demand override
const DEFAULT_DEMAND_TTL_SECS: u64 = 3600;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub auth: Arc<Authenticator>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    fn now_secs(&self) -> u64 {
        self.engine.context().clock.now_ms() / MS_PER_SECOND
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/api/status", get(node_status))
        .route("/api/reset-node-ip", post(reset_node_ip))
        .route("/api/test-node-connection", get(test_node_connection))
        .route("/api/available-nodes", get(available_nodes))
        .route("/api/connect-to-node", post(connect_to_node))
        .route("/api/client-disconnect", post(client_disconnect))
        .route("/api/node-rewards/:wallet", get(node_rewards))
        .route("/api/daily-claims", get(daily_claims))
        .route("/api/daily-claims/claim", post(claim_rewards))
        .route("/api/connected-clients", get(connected_clients))
        .route("/api/disconnect-client", post(disconnect_client))
        .route(
            "/api/wireguard/config",
            get(get_tunnel_config)
                .post(regenerate_tunnel_config)
                .delete(deactivate_tunnel_config),
        )
        .route("/api/wireguard/status", get(tunnel_status))
        .route("/api/wireguard/connected-clients", get(tunnel_peers))
        .route("/api/admin/demand", post(set_demand))
        .route("/api/admin/tokens", post(issue_token))
        .route("/api/network-stats", get(network_stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn_with_state(state.clone(), track_duration))
        .with_state(state)
}

async fn track_duration(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let timer = state.metrics.request_duration.start_timer();
    let response = next.run(req).await;
    timer.observe_duration();
    response
}

// Errors

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Auth(AuthError),
    Forbidden,
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Core(CoreError::Validation(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Core(e) => {
                let status = match e {
                    CoreError::Validation(_) | CoreError::ClaimTooSoon { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::Conflict(_) => StatusCode::CONFLICT,
                    CoreError::AddressPoolExhausted | CoreError::UpstreamUnavailable(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let mut body = json!({ "success": false, "error": e.to_string() });
                if let CoreError::ClaimTooSoon { next_claim_at, .. } = e {
                    body["nextClaimTime"] = json!(next_claim_at);
                }
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                }
                (status, body)
            }
            ApiError::Auth(e @ AuthError::SigningDisabled) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "success": false, "error": e.to_string() }),
            ),
            ApiError::Auth(e) => (
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "error": e.to_string() }),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "success": false, "error": "Access denied" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Successful response body
#[derive(Serialize)]
pub struct Envelope<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope {
        success: true,
        data,
    }))
}

// Identity

/// Authenticated caller
pub struct Caller(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match state.auth.authenticate(&parts.headers, state.now_secs()) {
            Ok(identity) => Ok(Caller(identity)),
            Err(e) => {
                state.metrics.auth_failures.inc();
                warn!("Rejected credentials: {}", e);
                Err(ApiError::Auth(e))
            }
        }
    }
}

impl Caller {
    /// Wallet the request acts on: the caller's own unless an admin names another
    fn target(&self, requested: Option<&str>) -> Result<String, ApiError> {
        match requested.map(str::trim).filter(|w| !w.is_empty()) {
            Some(wallet) if wallet != self.0.wallet_address && !self.0.is_admin => {
                Err(ApiError::Forbidden)
            }
            Some(wallet) => Ok(wallet.to_string()),
            None => Ok(self.0.wallet_address.clone()),
        }
    }

    fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.is_admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// Client address as reported by a fronting proxy
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header_value("x-forwarded-for").or_else(|| header_value("x-real-ip"))
}

// Node lifecycle

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectRequest {
    pub wallet_address: Option<String>,
    pub node_info: NodeInfo,
    pub is_host: bool,
}

async fn connect(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<serde_json::Value> {
    let wallet = caller.target(req.wallet_address.as_deref())?;
    let mut info = req.node_info;
    if info.ip.is_none() {
        info.ip = forwarded_ip(&headers);
    }

    let node = state.engine.registry.connect(&wallet, info, req.is_host).await?;
    state.metrics.node_connects.inc();

    ok(json!({
        "message": "Node registered",
        "ip": node.ip,
        "bandwidth": node.performance.bandwidth,
        "node": node,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletRequest {
    pub wallet_address: Option<String>,
}

async fn disconnect(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<WalletRequest>,
) -> ApiResult<serde_json::Value> {
    let wallet = caller.target(req.wallet_address.as_deref())?;

    let outcome = state.engine.registry.disconnect(&wallet).await?;
    state.metrics.node_disconnects.inc();

    ok(json!({
        "message": "Node disconnected",
        "uptime": outcome.uptime_seconds,
        "rewardAdded": outcome.reward_added,
        "rewards": outcome.rewards,
    }))
}

async fn node_status(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<WalletRequest>,
) -> ApiResult<serde_json::Value> {
    let wallet = caller.target(query.wallet_address.as_deref())?;
    let node = state.engine.registry.status(&wallet).await?;

    ok(json!({
        "active": node.is_active(),
        "status": node.status(),
        "nodeType": node.node_type,
        "ip": node.ip,
        "bandwidth": node.performance.bandwidth,
        "connectedUsers": node.connected_users,
        "uptime": node.stats.connection_uptime,
        "lastSeen": node.last_seen,
        "metrics": {
            "uptime": node.stats.connection_uptime,
            "latency": node.performance.latency,
            "packetLoss": node.performance.packet_loss,
        },
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetIpRequest {
    pub wallet_address: Option<String>,
    pub ip: Option<String>,
}

async fn reset_node_ip(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(req): Json<ResetIpRequest>,
) -> ApiResult<serde_json::Value> {
    let wallet = caller.target(req.wallet_address.as_deref())?;
    let ip = req
        .ip
        .or_else(|| forwarded_ip(&headers))
        .ok_or(ValidationError::MissingField("ip"))?;

    let node = state.engine.registry.reset_ip(&wallet, &ip).await?;
    ok(json!({ "message": "Node IP reset", "newIp": node.ip }))
}

async fn test_node_connection(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<WalletRequest>,
) -> ApiResult<serde_json::Value> {
    let wallet = caller.target(query.wallet_address.as_deref())?;

    // Probes are simulated: 10..100 ms
    let latency = f64::from(fastrand::u32(10..100));
    let node = state.engine.registry.record_probe(&wallet, latency).await?;

    ok(json!({
        "message": "Connection successful",
        "latency": latency,
        "ip": node.ip,
    }))
}

async fn network_stats(State(state): State<AppState>) -> ApiResult<exitnet_core::NetworkStats> {
    ok(state.engine.registry.network_stats().await?)
}

// Discovery and sessions

async fn available_nodes(
    State(state): State<AppState>,
    _caller: Caller,
) -> ApiResult<serde_json::Value> {
    let nodes = state.engine.ranker.list_available().await?;
    ok(json!({ "count": nodes.len(), "nodes": nodes }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectToNodeRequest {
    pub client_wallet_address: Option<String>,
    pub host_wallet_address: String,
}

async fn connect_to_node(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ConnectToNodeRequest>,
) -> ApiResult<serde_json::Value> {
    let client = caller.target(req.client_wallet_address.as_deref())?;

    let connection = state
        .engine
        .connections
        .open(&req.host_wallet_address, &client)
        .await?;
    state.metrics.active_connections.inc();

    let host = state.engine.registry.status(&connection.host_wallet_address).await?;
    ok(json!({
        "message": "Connected to node",
        "connectionId": connection.key().to_string(),
        "nodeIp": host.ip,
        "hostWalletAddress": connection.host_wallet_address,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientRequest {
    pub client_wallet_address: Option<String>,
}

async fn client_disconnect(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ClientRequest>,
) -> ApiResult<serde_json::Value> {
    let client = caller.target(req.client_wallet_address.as_deref())?;

    let connection = state.engine.connections.close_for_client(&client).await?;
    state.metrics.active_connections.dec();

    let now = state.engine.context().clock.now_ms();
    ok(json!({
        "message": "Disconnected from host",
        "hostWalletAddress": connection.host_wallet_address,
        "sessionDuration": connection.session_duration_at(now),
    }))
}

async fn connected_clients(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<serde_json::Value> {
    let clients = state
        .engine
        .connections
        .list_active(&identity.wallet_address)
        .await?;
    ok(json!({
        "totalConnections": clients.len(),
        "connectedClients": clients,
    }))
}

async fn disconnect_client(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Json(req): Json<ClientRequest>,
) -> ApiResult<serde_json::Value> {
    let client = req
        .client_wallet_address
        .ok_or(ValidationError::MissingField("clientWalletAddress"))?;

    let connection = state
        .engine
        .connections
        .close(&identity.wallet_address, &client)
        .await?;
    state.metrics.active_connections.dec();

    let now = state.engine.context().clock.now_ms();
    ok(json!({
        "message": "Client disconnected",
        "clientWalletAddress": connection.client_wallet_address,
        "sessionDuration": connection.session_duration_at(now),
    }))
}

// Rewards

async fn node_rewards(
    State(state): State<AppState>,
    caller: Caller,
    Path(wallet): Path<String>,
) -> ApiResult<exitnet_core::RewardResult> {
    let wallet = caller.target(Some(wallet.as_str()))?;
    let result = state.engine.rewards.calculate(&wallet).await?;
    state.metrics.reward_calculations.inc();
    ok(result)
}

async fn daily_claims(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<exitnet_core::ClaimOverview> {
    ok(state
        .engine
        .rewards
        .claim_status(&identity.wallet_address)
        .await?)
}

async fn claim_rewards(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<serde_json::Value> {
    let receipt = state.engine.rewards.claim(&identity.wallet_address).await?;
    state.metrics.reward_claims.inc();

    ok(json!({
        "message": "Rewards claimed successfully",
        "claimedAmount": receipt.claimed_amount,
        "totalRewardsClaimed": receipt.total_rewards_claimed,
        "nextClaimTime": receipt.next_claim_time,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandRequest {
    pub region: String,
    pub multiplier: f64,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

async fn set_demand(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<DemandRequest>,
) -> ApiResult<serde_json::Value> {
    caller.require_admin()?;
    let ttl = Duration::from_secs(req.ttl_secs.unwrap_or(DEFAULT_DEMAND_TTL_SECS));

    state
        .engine
        .rewards
        .set_demand_multiplier(&req.region, req.multiplier, ttl)
        .await?;
    info!(
        "Demand override by {}: region={}, multiplier={}",
        caller.0.wallet_address, req.region, req.multiplier
    );

    ok(json!({
        "region": req.region,
        "multiplier": req.multiplier,
        "ttlSecs": ttl.as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub wallet_address: String,
    #[serde(default)]
    pub is_admin: bool,
}

async fn issue_token(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<TokenRequest>,
) -> ApiResult<IssuedToken> {
    caller.require_admin()?;
    validate_wallet_address("walletAddress", req.wallet_address.trim())?;
    let issued = state
        .auth
        .issue_token(&req.wallet_address, req.is_admin, state.now_secs())?;
    info!(
        "Token issued by {}: wallet={}, admin={}",
        caller.0.wallet_address,
        req.wallet_address.trim(),
        req.is_admin
    );
    ok(issued)
}

// Tunnel configs

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfigBody {
    config: TunnelConfig,
    config_file: String,
}

impl From<TunnelConfig> for TunnelConfigBody {
    fn from(config: TunnelConfig) -> Self {
        let config_file = config.render();
        Self {
            config,
            config_file,
        }
    }
}

async fn get_tunnel_config(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<TunnelConfigBody> {
    let config = state
        .engine
        .tunnels
        .get_or_create(&identity.wallet_address)
        .await?;
    ok(config.into())
}

async fn regenerate_tunnel_config(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<TunnelConfigBody> {
    let config = state
        .engine
        .tunnels
        .regenerate(&identity.wallet_address)
        .await?;
    ok(config.into())
}

async fn deactivate_tunnel_config(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .tunnels
        .deactivate(&identity.wallet_address)
        .await?;
    ok(json!({ "message": "Tunnel configuration deactivated" }))
}

async fn tunnel_status(
    State(state): State<AppState>,
    _caller: Caller,
) -> ApiResult<exitnet_core::TunnelStatus> {
    let status = state.engine.tunnels.status().await?;
    state
        .metrics
        .tunnel_resync_failures
        .set(i64::try_from(status.consecutive_failures).unwrap_or(i64::MAX));
    ok(status)
}

async fn tunnel_peers(State(state): State<AppState>, caller: Caller) -> ApiResult<serde_json::Value> {
    caller.require_admin()?;
    let peers = state.engine.tunnels.connected_peers().await?;
    ok(json!({ "count": peers.len(), "clients": peers }))
}

// Service

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
