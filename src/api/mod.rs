pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::services::optimizer::RouteOptimizer;
use crate::services::tracking::TrackingManager;

#[derive(Clone)]
pub struct AppState {
    pub tracking: Arc<TrackingManager>,
    pub optimizer: Arc<RouteOptimizer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/tracking", get(ws::ws_tracking))
        .route("/routes/optimize", post(routes::optimize_route))
        .with_state(state)
}
