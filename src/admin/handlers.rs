use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::lifecycle::{ShutdownPhase, ShutdownState};
use crate::resilience::{CircuitBreakerStatus, CircuitState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub shutdown: ShutdownState,
    pub open_circuits: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForceStateRequest {
    pub state: CircuitState,
}

pub async fn get_status(State(state): State<AdminState>) -> (StatusCode, Json<SystemStatus>) {
    let shutdown = state.coordinator.state();
    let open_circuits = state
        .registry
        .statuses()
        .into_iter()
        .filter(|s| s.state != CircuitState::Closed)
        .map(|s| s.service_name)
        .collect();

    let (code, status) = match shutdown.state {
        ShutdownPhase::Running => (StatusCode::OK, "operational"),
        ShutdownPhase::Draining => (StatusCode::SERVICE_UNAVAILABLE, "draining"),
        ShutdownPhase::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "stopped"),
    };

    (
        code,
        Json(SystemStatus {
            version: env!("CARGO_PKG_VERSION"),
            status,
            shutdown,
            open_circuits,
        }),
    )
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<CircuitBreakerStatus>> {
    Json(state.registry.statuses())
}

pub async fn get_shutdown(State(state): State<AdminState>) -> Json<ShutdownState> {
    Json(state.coordinator.state())
}

/// Operator override of a breaker's state.
pub async fn force_breaker_state(
    State(state): State<AdminState>,
    Path(service): Path<String>,
    Json(request): Json<ForceStateRequest>,
) -> Result<Json<CircuitBreakerStatus>, StatusCode> {
    if !state.registry.contains(&service) {
        return Err(StatusCode::NOT_FOUND);
    }
    let breaker = state.registry.get(&service);
    breaker.force_state(request.state);
    Ok(Json(breaker.status()))
}
