//! Operator endpoints: health, breaker statuses, shutdown state.
//!
//! `/health` is open for load balancers; every `/admin/*` route sits behind
//! the bearer-key check in `auth.rs`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::ShutdownCoordinator;
use crate::resilience::CircuitBreakerRegistry;

#[derive(Clone)]
pub struct AdminState {
    pub registry: CircuitBreakerRegistry,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub api_key: Option<Arc<str>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/{service}/state", post(force_breaker_state))
        .route("/admin/shutdown", get(get_shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(get_status))
        .merge(protected)
        .with_state(state)
}
