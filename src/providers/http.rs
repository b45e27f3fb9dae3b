//! HTTP client for the dispatch backend, implementing all collaborator
//! ports against its JSON API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{AuthError, ProviderError, TaskStore, TokenVerifier, ZoneRegistry};
use crate::models::{DeliveryTask, DriverIdentity, GeoLocation, ZoneGeofence};

/// Client for the dispatch backend's collaborator endpoints
pub struct DispatchClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct VerifyTokenRequest<'a> {
    token: &'a str,
}

impl DispatchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl TokenVerifier for DispatchClient {
    async fn verify_token(&self, token: &str) -> Result<DriverIdentity, AuthError> {
        let response = self
            .client
            .post(self.url("/auth/verify"))
            .json(&VerifyTokenRequest { token })
            .send()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<DriverIdentity>()
                .await
                .map_err(|e| AuthError::Verification(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
            status => Err(AuthError::Verification(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl TaskStore for DispatchClient {
    async fn find_tasks_near(
        &self,
        location: &GeoLocation,
        radius_km: f64,
    ) -> Result<Vec<DeliveryTask>, ProviderError> {
        let response = self
            .client
            .get(self.url("/tasks/nearby"))
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("radius_km", radius_km.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "task lookup returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<DeliveryTask>>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn persist_driver_locations(
        &self,
        batch: HashMap<String, GeoLocation>,
    ) -> Result<(), ProviderError> {
        let count = batch.len();
        let response = self
            .client
            .post(self.url("/drivers/locations"))
            .json(&batch)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "location batch returned {}",
                response.status()
            )));
        }

        tracing::debug!(drivers = count, "persisted driver location batch");
        Ok(())
    }
}

#[async_trait]
impl ZoneRegistry for DispatchClient {
    async fn list_zone_geofences(&self) -> Result<Vec<ZoneGeofence>, ProviderError> {
        let response = self
            .client
            .get(self.url("/zones"))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "zone listing returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<ZoneGeofence>>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
