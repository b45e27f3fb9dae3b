//! Live-tracking session management: one session per driver, location
//! ingestion, geofence enter/exit detection, and batched persistence of
//! last-known locations.
//!
//! The manager owns all state shared across connections: the session map,
//! the location cache, the per-(driver, zone) containment cache, and the
//! zone list cache. Connection workers call into it sequentially for their
//! own driver, so no session is mutated by more than one task at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::models::{
    DeliveryTask, DriverIdentity, GeoLocation, GeofenceEvent, GeofenceEventType, ZoneGeofence,
};
use crate::providers::{AuthError, TaskStore, TokenVerifier, ZoneRegistry};
use crate::services::cache::TtlCache;
use crate::services::geo;

/// Cache key under which the zone list is memoized
const ZONES_KEY: &str = "zones";
/// Capacity of the geofence event fan-out channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TrackingConfig {
    /// TTL for last-known driver locations in seconds (default: 300)
    #[serde(default = "TrackingConfig::default_location_ttl_secs")]
    pub location_ttl_secs: u64,
    /// TTL for per-(driver, zone) containment state in seconds (default: 3600)
    #[serde(default = "TrackingConfig::default_geofence_state_ttl_secs")]
    pub geofence_state_ttl_secs: u64,
    /// TTL for the zone registry snapshot in seconds (default: 3600)
    #[serde(default = "TrackingConfig::default_zone_cache_ttl_secs")]
    pub zone_cache_ttl_secs: u64,
    /// Interval between location persistence batches in seconds (default: 5)
    #[serde(default = "TrackingConfig::default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Radius for the nearby-task push in kilometers (default: 5)
    #[serde(default = "TrackingConfig::default_nearby_radius_km")]
    pub nearby_radius_km: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            location_ttl_secs: Self::default_location_ttl_secs(),
            geofence_state_ttl_secs: Self::default_geofence_state_ttl_secs(),
            zone_cache_ttl_secs: Self::default_zone_cache_ttl_secs(),
            flush_interval_secs: Self::default_flush_interval_secs(),
            nearby_radius_km: Self::default_nearby_radius_km(),
        }
    }
}

impl TrackingConfig {
    fn default_location_ttl_secs() -> u64 {
        300
    }
    fn default_geofence_state_ttl_secs() -> u64 {
        3600
    }
    fn default_zone_cache_ttl_secs() -> u64 {
        3600
    }
    fn default_flush_interval_secs() -> u64 {
        5
    }
    fn default_nearby_radius_km() -> f64 {
        5.0
    }
}

/// One live driver connection
struct DriverSession {
    generation: u64,
    /// Dropping this closes the previous connection's shutdown channel
    _shutdown: mpsc::Sender<()>,
}

/// Handle returned to the connection worker on registration
pub struct SessionHandle {
    pub driver_id: String,
    generation: u64,
    /// Resolves (to None) when this session is replaced by a newer
    /// connection for the same driver
    pub shutdown: mpsc::Receiver<()>,
}

pub struct TrackingManager {
    config: TrackingConfig,
    verifier: Arc<dyn TokenVerifier>,
    task_store: Arc<dyn TaskStore>,
    zone_registry: Arc<dyn ZoneRegistry>,
    sessions: Mutex<HashMap<String, DriverSession>>,
    session_counter: AtomicU64,
    location_cache: TtlCache<String, GeoLocation>,
    geofence_state: TtlCache<String, bool>,
    zone_cache: TtlCache<String, Vec<ZoneGeofence>>,
    events_tx: broadcast::Sender<GeofenceEvent>,
}

impl TrackingManager {
    pub fn new(
        config: TrackingConfig,
        verifier: Arc<dyn TokenVerifier>,
        task_store: Arc<dyn TaskStore>,
        zone_registry: Arc<dyn ZoneRegistry>,
    ) -> Self {
        let location_cache = TtlCache::new(Duration::from_secs(config.location_ttl_secs));
        let geofence_state = TtlCache::new(Duration::from_secs(config.geofence_state_ttl_secs));
        let zone_cache = TtlCache::new(Duration::from_secs(config.zone_cache_ttl_secs));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            verifier,
            task_store,
            zone_registry,
            sessions: Mutex::new(HashMap::new()),
            session_counter: AtomicU64::new(0),
            location_cache,
            geofence_state,
            zone_cache,
            events_tx,
        }
    }

    /// Resolve a connection token to a driver identity. A failure is fatal
    /// for the connection; the manager never retries.
    pub async fn authenticate(&self, token: &str) -> Result<DriverIdentity, AuthError> {
        self.verifier.verify_token(token).await
    }

    /// Create the session for an authenticated driver. Any existing
    /// session for the same driver is replaced; its connection is told to
    /// shut down through the handle's channel.
    pub fn register_session(&self, driver_id: &str) -> SessionHandle {
        let generation = self.session_counter.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let session = DriverSession {
            generation,
            _shutdown: shutdown_tx,
        };

        let replaced = self
            .sessions
            .lock()
            .unwrap()
            .insert(driver_id.to_string(), session)
            .is_some();
        if replaced {
            info!(driver_id, "replacing existing session");
        } else {
            info!(driver_id, "driver connected");
        }

        SessionHandle {
            driver_id: driver_id.to_string(),
            generation,
            shutdown: shutdown_rx,
        }
    }

    /// Remove the session on disconnect. A stale handle (already replaced
    /// by a newer connection) leaves the current session untouched.
    pub fn remove_session(&self, handle: &SessionHandle) {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions
            .get(&handle.driver_id)
            .is_some_and(|s| s.generation == handle.generation)
        {
            sessions.remove(&handle.driver_id);
            info!(driver_id = %handle.driver_id, "driver disconnected");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Process a location update: refresh the location cache, look up
    /// nearby tasks for the driver, then run geofence detection.
    /// Collaborator failures are soft; an empty task list comes back when
    /// the lookup fails.
    pub async fn handle_location(&self, driver_id: &str, location: GeoLocation) -> Vec<DeliveryTask> {
        self.location_cache
            .set(driver_id.to_string(), location.clone());

        let nearby = match self
            .task_store
            .find_tasks_near(&location, self.config.nearby_radius_km)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(driver_id, error = %e, "nearby-task lookup failed");
                Vec::new()
            }
        };

        self.detect_geofences(driver_id, &location).await;

        nearby
    }

    /// Broadcast a client-asserted geofence transition as-is.
    pub fn assert_geofence(&self, driver_id: &str, zone_id: String, event_type: GeofenceEventType) {
        self.broadcast_event(GeofenceEvent {
            driver_id: driver_id.to_string(),
            zone_id,
            event_type,
            timestamp: Utc::now(),
        });
    }

    /// Subscribe to geofence events from all drivers.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GeofenceEvent> {
        self.events_tx.subscribe()
    }

    /// Compare containment against the last recorded state for every known
    /// zone and broadcast a transition on change. The first observation for
    /// a (driver, zone) pair records state silently unless the driver is
    /// already inside, which counts as an enter.
    async fn detect_geofences(&self, driver_id: &str, location: &GeoLocation) {
        let zones = match self.zones().await {
            Some(zones) => zones,
            None => return,
        };

        for zone in &zones {
            let key = format!("{}:{}", driver_id, zone.zone_id);
            let inside = geo::point_in_polygon(location, &zone.boundary);
            let previous = self.geofence_state.get(&key);

            if previous == Some(inside) {
                continue;
            }
            self.geofence_state.set(key, inside);

            if previous.is_some() || inside {
                self.broadcast_event(GeofenceEvent {
                    driver_id: driver_id.to_string(),
                    zone_id: zone.zone_id.clone(),
                    event_type: if inside {
                        GeofenceEventType::Enter
                    } else {
                        GeofenceEventType::Exit
                    },
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Zone list, memoized for the configured TTL. A registry failure
    /// skips detection for this update and is retried on the next one.
    async fn zones(&self) -> Option<Vec<ZoneGeofence>> {
        if let Some(zones) = self.zone_cache.get(&ZONES_KEY.to_string()) {
            return Some(zones);
        }

        match self.zone_registry.list_zone_geofences().await {
            Ok(zones) => {
                debug!(count = zones.len(), "refreshed zone geofences");
                self.zone_cache.set(ZONES_KEY.to_string(), zones.clone());
                Some(zones)
            }
            Err(e) => {
                warn!(error = %e, "zone registry refresh failed");
                None
            }
        }
    }

    fn broadcast_event(&self, event: GeofenceEvent) {
        // Send errors just mean no one is listening
        let _ = self.events_tx.send(event);
    }

    /// Persist the full current contents of the location cache once. Ten
    /// updates from one driver within a window persist as a single entry
    /// with the latest value.
    pub async fn flush_locations(&self) {
        let batch: HashMap<String, GeoLocation> = self.location_cache.entries().into_iter().collect();
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        if let Err(e) = self.task_store.persist_driver_locations(batch).await {
            warn!(drivers = count, error = %e, "location batch persist failed");
        }
    }

    /// Periodic batch-flush loop. Runs until the process exits; only reads
    /// caches, never touches per-connection state.
    pub async fn run_flush_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.flush_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.flush_locations().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskStatus, TimeWindow};
    use crate::providers::ProviderError;
    use async_trait::async_trait;

    struct MockVerifier;

    #[async_trait]
    impl TokenVerifier for MockVerifier {
        async fn verify_token(&self, token: &str) -> Result<DriverIdentity, AuthError> {
            if token == "valid-token" {
                Ok(DriverIdentity {
                    driver_id: "driver-1".to_string(),
                })
            } else {
                Err(AuthError::InvalidToken)
            }
        }
    }

    #[derive(Default)]
    struct MockTaskStore {
        tasks: Vec<DeliveryTask>,
        persisted: Mutex<Vec<HashMap<String, GeoLocation>>>,
    }

    #[async_trait]
    impl TaskStore for MockTaskStore {
        async fn find_tasks_near(
            &self,
            location: &GeoLocation,
            radius_km: f64,
        ) -> Result<Vec<DeliveryTask>, ProviderError> {
            Ok(self
                .tasks
                .iter()
                .filter(|t| geo::distance_km(location, &t.pickup_location) <= radius_km)
                .cloned()
                .collect())
        }

        async fn persist_driver_locations(
            &self,
            batch: HashMap<String, GeoLocation>,
        ) -> Result<(), ProviderError> {
            self.persisted.lock().unwrap().push(batch);
            Ok(())
        }
    }

    struct MockZones(Vec<ZoneGeofence>);

    #[async_trait]
    impl ZoneRegistry for MockZones {
        async fn list_zone_geofences(&self) -> Result<Vec<ZoneGeofence>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn square_zone(id: &str) -> ZoneGeofence {
        ZoneGeofence {
            zone_id: id.to_string(),
            boundary: vec![
                GeoLocation::new(0.0, 0.0),
                GeoLocation::new(0.0, 1.0),
                GeoLocation::new(1.0, 1.0),
                GeoLocation::new(1.0, 0.0),
            ],
        }
    }

    fn task(id: &str, lat: f64, lon: f64) -> DeliveryTask {
        let now = Utc::now();
        DeliveryTask {
            id: id.to_string(),
            pickup_location: GeoLocation::new(lat, lon),
            delivery_location: GeoLocation::new(lat + 0.01, lon),
            window: TimeWindow {
                start: now,
                end: now + chrono::Duration::hours(4),
            },
            service_time_minutes: None,
            priority: Priority::Medium,
            status: TaskStatus::Available,
        }
    }

    fn manager_with(
        task_store: Arc<MockTaskStore>,
        zones: Vec<ZoneGeofence>,
    ) -> Arc<TrackingManager> {
        Arc::new(TrackingManager::new(
            TrackingConfig::default(),
            Arc::new(MockVerifier),
            task_store,
            Arc::new(MockZones(zones)),
        ))
    }

    #[tokio::test]
    async fn test_authenticate_valid_and_invalid() {
        let manager = manager_with(Arc::new(MockTaskStore::default()), vec![]);
        let identity = manager.authenticate("valid-token").await.unwrap();
        assert_eq!(identity.driver_id, "driver-1");
        assert!(manager.authenticate("bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_session_replacement_closes_previous() {
        let manager = manager_with(Arc::new(MockTaskStore::default()), vec![]);

        let mut first = manager.register_session("driver-1");
        let second = manager.register_session("driver-1");
        assert_eq!(manager.session_count(), 1);

        // The first connection's shutdown channel resolves once replaced
        assert!(first.shutdown.recv().await.is_none());

        // A stale handle must not evict the live session
        manager.remove_session(&first);
        assert_eq!(manager.session_count(), 1);

        manager.remove_session(&second);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_nearby_tasks_within_radius_only() {
        let store = Arc::new(MockTaskStore {
            tasks: vec![task("near", 0.01, 0.01), task("far", 2.0, 2.0)],
            ..Default::default()
        });
        let manager = manager_with(store, vec![]);
        let _session = manager.register_session("driver-1");

        let tasks = manager
            .handle_location("driver-1", GeoLocation::new(0.0, 0.0))
            .await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "near");
    }

    #[tokio::test]
    async fn test_geofence_enter_idle_exit() {
        let manager = manager_with(
            Arc::new(MockTaskStore::default()),
            vec![square_zone("Z1")],
        );
        let _session = manager.register_session("driver-1");
        let mut events = manager.subscribe_events();

        // Outside, then inside, then still inside, then outside again
        manager
            .handle_location("driver-1", GeoLocation::new(-0.5, 0.5))
            .await;
        manager
            .handle_location("driver-1", GeoLocation::new(0.5, 0.5))
            .await;
        manager
            .handle_location("driver-1", GeoLocation::new(0.6, 0.5))
            .await;
        manager
            .handle_location("driver-1", GeoLocation::new(-0.5, 0.5))
            .await;

        let enter = events.try_recv().unwrap();
        assert_eq!(enter.event_type, GeofenceEventType::Enter);
        assert_eq!(enter.zone_id, "Z1");
        assert_eq!(enter.driver_id, "driver-1");

        let exit = events.try_recv().unwrap();
        assert_eq!(exit.event_type, GeofenceEventType::Exit);

        // No further transitions
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_initial_inside_counts_as_enter() {
        let manager = manager_with(
            Arc::new(MockTaskStore::default()),
            vec![square_zone("Z1")],
        );
        let _session = manager.register_session("driver-1");
        let mut events = manager.subscribe_events();

        manager
            .handle_location("driver-1", GeoLocation::new(0.5, 0.5))
            .await;

        let event = events.try_recv().unwrap();
        assert_eq!(event.event_type, GeofenceEventType::Enter);
    }

    #[tokio::test]
    async fn test_client_asserted_geofence_broadcasts() {
        let manager = manager_with(Arc::new(MockTaskStore::default()), vec![]);
        let mut events = manager.subscribe_events();

        manager.assert_geofence("driver-1", "Z9".to_string(), GeofenceEventType::Exit);

        let event = events.try_recv().unwrap();
        assert_eq!(event.zone_id, "Z9");
        assert_eq!(event.event_type, GeofenceEventType::Exit);
    }

    #[tokio::test]
    async fn test_flush_persists_latest_value_once() {
        let store = Arc::new(MockTaskStore::default());
        let manager = manager_with(store.clone(), vec![]);
        let _session = manager.register_session("driver-1");

        // Several updates in one window collapse to the latest value
        for lon in [0.1, 0.2, 0.3] {
            manager
                .handle_location("driver-1", GeoLocation::new(0.0, lon))
                .await;
        }
        manager.flush_locations().await;

        let persisted = store.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        let batch = &persisted[0];
        assert_eq!(batch.len(), 1);
        assert_eq!(batch["driver-1"].longitude, 0.3);
    }

    #[tokio::test]
    async fn test_flush_skips_empty_cache() {
        let store = Arc::new(MockTaskStore::default());
        let manager = manager_with(store.clone(), vec![]);

        manager.flush_locations().await;
        assert!(store.persisted.lock().unwrap().is_empty());
    }
}
