// HTTP routes: read-only JSON over the query service

mod http;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::query::QueryService;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) query: QueryService,
    /// Window used by /api/optimization when no `hours` is given.
    pub(crate) default_window_hours: u32,
}

pub fn app(query: QueryService, default_window_hours: u32) -> Router {
    let state = AppState {
        query,
        default_window_hours,
    };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/status", get(http::status_handler)) // GET /api/status
        .route("/api/fleet", get(http::fleet_handler)) // GET /api/fleet
        .route("/api/fleet/insights", get(http::fleet_insights_handler)) // GET /api/fleet/insights?days=
        .route("/api/history", get(http::history_handler)) // GET /api/history?hours=&device_id=
        .route("/api/optimization/{device_id}", get(http::optimization_handler)) // GET /api/optimization/{id}?hours=
        .route("/api/health/{device_id}", get(http::health_handler)) // GET /api/health/{id}
        .route("/api/alerts", get(http::alerts_handler)) // GET /api/alerts
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
