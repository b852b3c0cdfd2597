//! `BeaconServer`: axum HTTP + WebSocket surface over a running hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use beacon_core::ClientId;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::endpoint::{self, EndpointConfig};
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::heartbeat::{HEARTBEAT_PATH, heartbeat_handler};
use crate::hub::HubHandle;
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub that owns client membership.
    pub hub: HubHandle,
    /// Per-connection limits.
    pub endpoint: EndpointConfig,
    /// Upgrade cap (`0` = unlimited).
    pub max_connections: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The beacon HTTP server.
pub struct BeaconServer {
    config: ServerConfig,
    hub: HubHandle,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl BeaconServer {
    /// Create a server in front of `hub`.
    pub fn new(config: ServerConfig, hub: HubHandle, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self {
            config,
            hub,
            shutdown,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            endpoint: EndpointConfig::from(&self.config),
            max_connections: self.config.max_connections,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws/{user_id}", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(HEARTBEAT_PATH, post(heartbeat_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, "beacon server listening");

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server exited with error");
            }
            info!("beacon server stopped");
        });

        Ok((local_addr, task))
    }

    /// The hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws/{user_id}
async fn ws_handler(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.max_connections > 0 && state.hub.connection_count() >= state.max_connections {
        counter!(WS_REJECTED_TOTAL).increment(1);
        warn!(client_id = %user_id, max = state.max_connections, "connection cap reached, rejecting upgrade");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "too many connections"})),
        )
            .into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let max = state.endpoint.max_message_size;
    let hub = state.hub.clone();
    let config = state.endpoint.clone();
    let id = ClientId::from(user_id);
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| endpoint::run_connection(socket, id, hub, config))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
