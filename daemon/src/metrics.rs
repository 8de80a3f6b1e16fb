//! Prometheus metrics

use crate::config::MonitoringConfig;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::LazyLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Global metrics registry
static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Metrics struct
pub struct Metrics {
    // Counters
    pub node_connects: IntCounter,
    pub node_disconnects: IntCounter,
    pub reward_calculations: IntCounter,
    pub reward_claims: IntCounter,
    pub auth_failures: IntCounter,

    // Gauges
    pub active_connections: IntGauge,
    pub tunnel_resync_failures: IntGauge,

    // Histograms
    pub request_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let node_connects = IntCounter::with_opts(Opts::new(
            "exitnet_node_connects_total",
            "Total node connect calls",
        ))
        .unwrap();

        let node_disconnects = IntCounter::with_opts(Opts::new(
            "exitnet_node_disconnects_total",
            "Total node disconnect calls",
        ))
        .unwrap();

        let reward_calculations = IntCounter::with_opts(Opts::new(
            "exitnet_reward_calculations_total",
            "Total reward lookups",
        ))
        .unwrap();

        let reward_claims = IntCounter::with_opts(Opts::new(
            "exitnet_reward_claims_total",
            "Total successful reward claims",
        ))
        .unwrap();

        let auth_failures = IntCounter::with_opts(Opts::new(
            "exitnet_auth_failures_total",
            "Total rejected credentials",
        ))
        .unwrap();

        let active_connections = IntGauge::with_opts(Opts::new(
            "exitnet_active_connections",
            "Client sessions opened minus closed through this process",
        ))
        .unwrap();

        let tunnel_resync_failures = IntGauge::with_opts(Opts::new(
            "exitnet_tunnel_resync_consecutive_failures",
            "Consecutive failed tunnel peer resyncs",
        ))
        .unwrap();

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "exitnet_api_request_duration_seconds",
                "API request duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .unwrap();

        // Register metrics
        REGISTRY.register(Box::new(node_connects.clone())).ok();
        REGISTRY.register(Box::new(node_disconnects.clone())).ok();
        REGISTRY.register(Box::new(reward_calculations.clone())).ok();
        REGISTRY.register(Box::new(reward_claims.clone())).ok();
        REGISTRY.register(Box::new(auth_failures.clone())).ok();
        REGISTRY.register(Box::new(active_connections.clone())).ok();
        REGISTRY.register(Box::new(tunnel_resync_failures.clone())).ok();
        REGISTRY.register(Box::new(request_duration.clone())).ok();

        Self {
            node_connects,
            node_disconnects,
            reward_calculations,
            reward_claims,
            auth_failures,
            active_connections,
            tunnel_resync_failures,
            request_duration,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the registry in the Prometheus text format
pub fn render() -> Vec<u8> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    buffer
}

/// Start the metrics server
pub fn start_server(config: &MonitoringConfig) -> JoinHandle<()> {
    let bind = config.prometheus_bind;
    let enabled = config.prometheus_enabled;

    tokio::spawn(async move {
        if !enabled {
            info!("Prometheus metrics disabled");
            return;
        }

        use bytes::Bytes;
        use http_body_util::Full;
        use hyper::{Response, server::conn::http1, service::service_fn};
        use hyper_util::rt::TokioIo;

        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics server: {}", e);
                return;
            }
        };

        info!("Prometheus metrics server listening on {}", bind);

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(r) => r,
                Err(e) => {
                    error!("Metrics accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(|_req| async {
                    let mut response = Response::new(Full::new(Bytes::from(render())));
                    response.headers_mut().insert(
                        hyper::header::CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    Ok::<_, std::convert::Infallible>(response)
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Metrics connection error: {}", e);
                }
            });
        }
    })
}
