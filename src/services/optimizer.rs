//! Delivery-route construction and improvement.
//!
//! Two phases: a feasible-greedy nearest-neighbor pass that respects time
//! windows, then 2-opt local search bounded by the caller's travel-time
//! cap. Traffic observations adjust raw distances through a 15-minute
//! cache; finished routes are memoized for 5 minutes.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{GeoLocation, Priority, Route, Stop, TrafficSegment};
use crate::services::cache::TtlCache;
use crate::services::geo;

/// Score weight per kilometer of total distance
const DISTANCE_WEIGHT: f64 = -0.1;
/// Score weight per minute of total route time
const TIME_WEIGHT: f64 = -0.05;
/// Bonus for arriving within a stop's window
const ON_TIME_BONUS: f64 = 10.0;
/// Penalty for arriving after a stop's window closed
const LATE_PENALTY: f64 = -20.0;
/// Per-position bonus for scheduling high-priority stops early
const PRIORITY_WEIGHT: f64 = 5.0;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OptimizerConfig {
    /// Assumed average urban travel speed in km/h (default: 30)
    #[serde(default = "OptimizerConfig::default_avg_speed_kmh")]
    pub avg_speed_kmh: f64,
    /// TTL for memoized routes in seconds (default: 300)
    #[serde(default = "OptimizerConfig::default_route_cache_ttl_secs")]
    pub route_cache_ttl_secs: u64,
    /// TTL for traffic observations in seconds (default: 900)
    #[serde(default = "OptimizerConfig::default_traffic_cache_ttl_secs")]
    pub traffic_cache_ttl_secs: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            avg_speed_kmh: Self::default_avg_speed_kmh(),
            route_cache_ttl_secs: Self::default_route_cache_ttl_secs(),
            traffic_cache_ttl_secs: Self::default_traffic_cache_ttl_secs(),
        }
    }
}

impl OptimizerConfig {
    fn default_avg_speed_kmh() -> f64 {
        30.0
    }
    fn default_route_cache_ttl_secs() -> u64 {
        300
    }
    fn default_traffic_cache_ttl_secs() -> u64 {
        900
    }
}

/// Route optimizer with injected route and traffic caches.
///
/// Synchronous CPU-bound work; callers invoke it from whatever context
/// requests a route. Never fails for well-formed input — malformed
/// coordinates propagate as garbage distances per the GeoMath contract.
pub struct RouteOptimizer {
    config: OptimizerConfig,
    route_cache: TtlCache<String, Route>,
    traffic_cache: TtlCache<String, TrafficSegment>,
}

/// Walked state for one candidate ordering
struct Evaluation {
    total_distance_km: f64,
    total_time_minutes: f64,
    score: f64,
}

impl RouteOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let route_cache = TtlCache::new(Duration::from_secs(config.route_cache_ttl_secs));
        let traffic_cache = TtlCache::new(Duration::from_secs(config.traffic_cache_ttl_secs));
        Self {
            config,
            route_cache,
            traffic_cache,
        }
    }

    /// Order the given stops into a near-optimal route starting from
    /// `start` at `departure`.
    ///
    /// Stops whose windows cannot be met from any reachable position are
    /// left out of the ordering and reported in `Route::unscheduled`.
    /// Results are cached for the configured TTL keyed on the stop-ID set
    /// and start location, so a repeat call inside the window returns the
    /// identical route even if traffic data changed in between.
    pub fn optimize_route(
        &self,
        stops: &[Stop],
        start: &GeoLocation,
        max_travel_time_minutes: f64,
        departure: DateTime<Utc>,
    ) -> Route {
        if stops.is_empty() {
            return Route::empty();
        }

        let cache_key = cache_key(stops, start);
        if let Some(cached) = self.route_cache.get(&cache_key) {
            tracing::debug!(key = %cache_key, "route cache hit");
            return cached;
        }

        let (ordered, unscheduled) = self.construct_greedy(stops, start, departure);
        let ordered = self.improve_2opt(ordered, start, max_travel_time_minutes, departure);

        let eval = self.evaluate(&ordered, start, departure);
        let route = Route {
            stops: ordered,
            total_distance_km: eval.total_distance_km,
            total_time_minutes: eval.total_time_minutes,
            score: eval.score,
            unscheduled,
        };

        self.route_cache.set(cache_key, route.clone());
        route
    }

    /// Record a traffic observation; it adjusts distances for its segment
    /// until it expires.
    pub fn record_traffic(&self, segment: TrafficSegment) {
        let key = segment_key(&segment.from, &segment.to);
        self.traffic_cache.set(key, segment);
    }

    /// Phase A: nearest-neighbor construction under time windows.
    ///
    /// Returns the visiting order plus the IDs of stops that never became
    /// reachable before their windows closed.
    fn construct_greedy(
        &self,
        stops: &[Stop],
        start: &GeoLocation,
        departure: DateTime<Utc>,
    ) -> (Vec<Stop>, Vec<String>) {
        let mut unvisited: Vec<Stop> = stops.to_vec();
        let mut ordered = Vec::with_capacity(stops.len());
        let mut current = start.clone();
        let mut elapsed = 0.0_f64;

        while !unvisited.is_empty() {
            let mut best: Option<(usize, f64, f64, f64)> = None; // (index, cost, distance, wait)

            for (index, stop) in unvisited.iter().enumerate() {
                let distance = self.adjusted_distance(&current, &stop.location);
                let travel = self.travel_minutes(distance);
                let arrival = elapsed + travel;

                // Cannot arrive before the window closes; skip for this step
                if arrival > minutes_from(departure, stop.window.end) {
                    continue;
                }

                let wait = (minutes_from(departure, stop.window.start) - arrival).max(0.0);
                let cost = distance + wait;

                if best.map_or(true, |(_, best_cost, _, _)| cost < best_cost) {
                    best = Some((index, cost, distance, wait));
                }
            }

            // No valid candidate from here; remaining stops stay unscheduled
            let Some((index, _, distance, wait)) = best else {
                break;
            };

            let stop = unvisited.swap_remove(index);
            elapsed += self.travel_minutes(distance) + wait + stop.service_time_minutes;
            current = stop.location.clone();
            ordered.push(stop);
        }

        let unscheduled = unvisited.into_iter().map(|s| s.task_id).collect();
        (ordered, unscheduled)
    }

    /// Phase B: 2-opt local search. Reverses every sub-sequence `[i..j]`,
    /// keeps the swap only when the full recomputed route both fits the
    /// travel-time cap and scores higher, and stops once a full pass
    /// accepts nothing.
    fn improve_2opt(
        &self,
        mut route: Vec<Stop>,
        start: &GeoLocation,
        max_travel_time_minutes: f64,
        departure: DateTime<Utc>,
    ) -> Vec<Stop> {
        if route.len() < 2 {
            return route;
        }

        let mut best = route.clone();
        let mut best_score = self.evaluate(&best, start, departure).score;
        let mut improved = true;

        while improved {
            improved = false;

            for i in 0..route.len() - 1 {
                for j in i + 1..route.len() {
                    let mut candidate = route.clone();
                    candidate[i..=j].reverse();

                    let eval = self.evaluate(&candidate, start, departure);
                    if eval.total_time_minutes <= max_travel_time_minutes
                        && eval.score > best_score
                    {
                        best = candidate;
                        best_score = eval.score;
                        improved = true;
                    }
                }
            }

            route = best.clone();
        }

        best
    }

    /// Walk an ordering and compute totals plus its score.
    fn evaluate(&self, order: &[Stop], start: &GeoLocation, departure: DateTime<Utc>) -> Evaluation {
        let mut current = start;
        let mut elapsed = 0.0_f64;
        let mut total_distance = 0.0_f64;
        let mut score = 0.0_f64;

        for (position, stop) in order.iter().enumerate() {
            let distance = self.adjusted_distance(current, &stop.location);
            let travel = self.travel_minutes(distance);
            let arrival = elapsed + travel;
            let wait = (minutes_from(departure, stop.window.start) - arrival).max(0.0);

            total_distance += distance;
            elapsed = arrival + wait + stop.service_time_minutes;
            current = &stop.location;

            score += if arrival <= minutes_from(departure, stop.window.end) {
                ON_TIME_BONUS
            } else {
                LATE_PENALTY
            };

            if stop.priority == Priority::High {
                score += PRIORITY_WEIGHT * (order.len() - position) as f64;
            }
        }

        score += DISTANCE_WEIGHT * total_distance + TIME_WEIGHT * elapsed;

        Evaluation {
            total_distance_km: total_distance,
            total_time_minutes: elapsed,
            score,
        }
    }

    /// Raw distance scaled by the cached traffic factor (1.0 when no
    /// observation exists for the segment).
    fn adjusted_distance(&self, from: &GeoLocation, to: &GeoLocation) -> f64 {
        let factor = self
            .traffic_cache
            .get(&segment_key(from, to))
            .map(|segment| segment.factor)
            .unwrap_or(1.0);
        geo::distance_km(from, to) * factor
    }

    fn travel_minutes(&self, distance_km: f64) -> f64 {
        distance_km / self.config.avg_speed_kmh * 60.0
    }
}

/// Minutes between the route departure instant and a wall-clock time
fn minutes_from(departure: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (at - departure).num_seconds() as f64 / 60.0
}

fn segment_key(from: &GeoLocation, to: &GeoLocation) -> String {
    format!(
        "{},{}-{},{}",
        from.latitude, from.longitude, to.latitude, to.longitude
    )
}

fn cache_key(stops: &[Stop], start: &GeoLocation) -> String {
    let mut ids: Vec<&str> = stops.iter().map(|s| s.task_id.as_str()).collect();
    ids.sort_unstable();
    format!("{}:{},{}", ids.join(","), start.latitude, start.longitude)
}
