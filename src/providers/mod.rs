//! Collaborator interfaces for everything this engine does not own:
//! token verification, the delivery-task store, and the zone registry.
//! Implemented elsewhere; only the contracts live here.

pub mod http;

pub use http::DispatchClient;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DeliveryTask, DriverIdentity, GeoLocation, ZoneGeofence};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("Token verification failed: {0}")]
    Verification(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

/// Resolves a connection token to a driver identity. Called once per
/// connection, before any message is accepted.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<DriverIdentity, AuthError>;
}

/// The external delivery-task store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks whose pickup lies within `radius_km` of a location.
    async fn find_tasks_near(
        &self,
        location: &GeoLocation,
        radius_km: f64,
    ) -> Result<Vec<DeliveryTask>, ProviderError>;

    /// Durably persist the latest known location per driver. Failures are
    /// soft: the next flush cycle retries with the newest cached value.
    async fn persist_driver_locations(
        &self,
        batch: HashMap<String, GeoLocation>,
    ) -> Result<(), ProviderError>;
}

/// The external zone/geofence registry.
#[async_trait]
pub trait ZoneRegistry: Send + Sync {
    async fn list_zone_geofences(&self) -> Result<Vec<ZoneGeofence>, ProviderError>;
}
