//! Read-only status server
//!
//! Liveness and readiness probes plus JSON views of the federation: the
//! exchange summary, the merged book and per-coordinator status.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::federation::{ConnectionMode, Federation, SourceStatus};

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub connection_mode: ConnectionMode,
    pub loading: bool,
    pub components: Vec<ComponentHealth>,
}

/// Shared state for the status server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub federation: Federation,
}

impl HealthState {
    pub fn new(federation: Federation) -> Self {
        Self {
            started_at: Utc::now(),
            federation,
        }
    }

    pub async fn get_health(&self) -> HealthResponse {
        let stats = self.federation.exchange().await;
        let mode = self.federation.connection_mode().await;
        let relays = self.federation.relay_statuses().await;
        let mut components = Vec::new();

        let coordinator_status = if stats.enabled_coordinators == 0 {
            HealthStatus::Unhealthy
        } else if stats.online_coordinators < stats.enabled_coordinators {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        components.push(ComponentHealth {
            name: "coordinators".to_string(),
            status: coordinator_status,
            message: Some(format!(
                "{}/{} online",
                stats.online_coordinators, stats.enabled_coordinators
            )),
        });

        let failed_relays = relays
            .values()
            .filter(|s| matches!(s, SourceStatus::Failed(_)))
            .count();
        let relay_status = match mode {
            ConnectionMode::Subscribed if !relays.is_empty() && failed_relays == relays.len() => {
                HealthStatus::Unhealthy
            }
            ConnectionMode::Subscribed if failed_relays > 0 => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };
        components.push(ComponentHealth {
            name: "relays".to_string(),
            status: relay_status,
            message: (failed_relays > 0).then(|| format!("{failed_relays} relay(s) failed")),
        });

        let feed_status = match mode {
            ConnectionMode::Disconnected => HealthStatus::Unhealthy,
            _ if stats.loading => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };
        components.push(ComponentHealth {
            name: "book".to_string(),
            status: feed_status,
            message: Some(format!(
                "{} buy / {} sell",
                stats.info.num_public_buy_orders, stats.info.num_public_sell_orders
            )),
        });

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            connection_mode: mode,
            loading: stats.loading,
            components,
        }
    }
}

/// Status server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Start the status server
    pub async fn run(&self) -> crate::Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting status server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::FedError::Internal(format!("Status server error: {}", e)))?;

        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/exchange", get(exchange_handler))
        .route("/book", get(book_handler))
        .route("/coordinators", get(coordinators_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Ready once nothing is loading
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.federation.loading().await {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn exchange_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.federation.exchange().await)
}

async fn book_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.federation.book().await.orders().clone())
}

async fn coordinators_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.federation.coordinator_statuses().await)
}
