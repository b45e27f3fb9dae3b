//! HTTP wrapper over the route optimizer for non-websocket callers.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::AppState;
use crate::models::{DeliveryTask, GeoLocation, Route, Stop};

#[derive(Debug, Deserialize)]
pub struct OptimizeRouteRequest {
    /// Pre-built stops to schedule
    #[serde(default)]
    pub stops: Vec<Stop>,
    /// Delivery tasks to schedule; each contributes its delivery leg
    #[serde(default)]
    pub tasks: Vec<DeliveryTask>,
    pub start: GeoLocation,
    pub max_travel_time_minutes: f64,
    /// Route departure instant; defaults to now
    #[serde(default)]
    pub departure: Option<DateTime<Utc>>,
}

fn collect_stops(request: &OptimizeRouteRequest) -> Vec<Stop> {
    let mut stops = request.stops.clone();
    stops.extend(request.tasks.iter().map(Stop::from_task));
    stops
}

/// Order a set of stops into a near-optimal route.
///
/// Never fails for well-formed input: an empty stop list yields an empty
/// route, and stops with unreachable windows come back in `unscheduled`.
pub async fn optimize_route(
    State(state): State<AppState>,
    Json(request): Json<OptimizeRouteRequest>,
) -> Json<Route> {
    let stops = collect_stops(&request);
    let departure = request.departure.unwrap_or_else(Utc::now);
    let route = state.optimizer.optimize_route(
        &stops,
        &request.start,
        request.max_travel_time_minutes,
        departure,
    );
    Json(route)
}
