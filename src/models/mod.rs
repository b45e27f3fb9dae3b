use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default service time assumed when a task carries no estimate (minutes)
const DEFAULT_SERVICE_TIME_MINUTES: f64 = 15.0;

/// A geographic coordinate pair
///
/// Latitude/longitude are expected to be in range ([-90, 90] / [-180, 180]);
/// out-of-range values are not rejected here and will propagate as garbage
/// distances downstream. The geohash is derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geohash: Option<String>,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            geohash: None,
        }
    }
}

/// The interval within which arrival at a stop is acceptable
///
/// Invariant: start <= end. Not enforced at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Task priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// One scheduled pickup or delivery location within a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Task this stop belongs to, unique within a route
    pub task_id: String,
    pub location: GeoLocation,
    pub window: TimeWindow,
    /// Time spent at the stop itself (handover, signature, ...)
    pub service_time_minutes: f64,
    pub priority: Priority,
}

impl Stop {
    /// Build a stop for the delivery leg of a task
    pub fn from_task(task: &DeliveryTask) -> Self {
        Self {
            task_id: task.id.clone(),
            location: task.delivery_location.clone(),
            window: task.window,
            service_time_minutes: task
                .service_time_minutes
                .unwrap_or(DEFAULT_SERVICE_TIME_MINUTES),
            priority: task.priority,
        }
    }
}

/// An ordered visiting plan over a set of stops
///
/// Immutable once returned; re-optimization produces a fresh value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_time_minutes: f64,
    pub score: f64,
    /// IDs of input stops that could not be scheduled within their
    /// time windows and were left out of the route
    pub unscheduled: Vec<String>,
}

impl Route {
    pub fn empty() -> Self {
        Self {
            stops: Vec::new(),
            total_distance_km: 0.0,
            total_time_minutes: 0.0,
            score: 0.0,
            unscheduled: Vec::new(),
        }
    }
}

/// A congestion observation for one directed segment
///
/// Factor is a multiplier >= 1.0 on raw distance. Absence of a cached
/// segment means factor 1.0 (no congestion data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSegment {
    pub from: GeoLocation,
    pub to: GeoLocation,
    pub factor: f64,
    pub observed_at: DateTime<Utc>,
}

/// Delivery task status as tracked by the task store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Available,
    Assigned,
    InProgress,
    Completed,
}

/// A delivery task as served by the external task store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub id: String,
    pub pickup_location: GeoLocation,
    pub delivery_location: GeoLocation,
    pub window: TimeWindow,
    /// Estimated on-site duration in minutes, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_time_minutes: Option<f64>,
    pub priority: Priority,
    pub status: TaskStatus,
}

/// A polygonal zone boundary from the zone registry
///
/// The boundary must be a simple polygon with at least 3 vertices;
/// self-intersecting polygons give undefined containment results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneGeofence {
    pub zone_id: String,
    pub boundary: Vec<GeoLocation>,
}

/// Direction of a geofence transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceEventType {
    Enter,
    Exit,
}

/// A detected or client-asserted zone boundary crossing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub driver_id: String,
    pub zone_id: String,
    pub event_type: GeofenceEventType,
    pub timestamp: DateTime<Utc>,
}

/// Identity resolved from a connection token
#[derive(Debug, Clone, Deserialize)]
pub struct DriverIdentity {
    pub driver_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stop_from_task_defaults_service_time() {
        let window = TimeWindow {
            start: Utc.with_ymd_and_hms(2026, 8, 27, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap(),
        };
        let mut task = DeliveryTask {
            id: "t1".to_string(),
            pickup_location: GeoLocation::new(0.0, 0.0),
            delivery_location: GeoLocation::new(1.0, 1.0),
            window,
            service_time_minutes: None,
            priority: Priority::High,
            status: TaskStatus::Assigned,
        };

        let stop = Stop::from_task(&task);
        assert_eq!(stop.task_id, "t1");
        assert_eq!(stop.location, task.delivery_location);
        assert_eq!(stop.service_time_minutes, DEFAULT_SERVICE_TIME_MINUTES);
        assert_eq!(stop.priority, Priority::High);

        task.service_time_minutes = Some(20.0);
        assert_eq!(Stop::from_task(&task).service_time_minutes, 20.0);
    }

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), r#""urgent""#);
        assert_eq!(
            serde_json::from_str::<Priority>(r#""high""#).unwrap(),
            Priority::High
        );
    }
}
