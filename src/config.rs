use serde::Deserialize;
use std::path::Path;

use crate::services::optimizer::OptimizerConfig;
use crate::services::tracking::TrackingConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the server binds to (default: 0.0.0.0:3000)
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// Base URL of the dispatch backend (auth, task store, zone registry)
    pub dispatch_base_url: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Live-tracking settings
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Route optimizer settings
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl Config {
    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config =
            serde_yaml::from_str("dispatch_base_url: http://localhost:4000").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(!config.cors_permissive);
        assert_eq!(config.tracking.flush_interval_secs, 5);
        assert_eq!(config.tracking.nearby_radius_km, 5.0);
        assert_eq!(config.optimizer.avg_speed_kmh, 30.0);
        assert_eq!(config.optimizer.route_cache_ttl_secs, 300);
    }

    #[test]
    fn test_partial_section_override() {
        let yaml = r#"
dispatch_base_url: http://localhost:4000
tracking:
  flush_interval_secs: 10
optimizer:
  avg_speed_kmh: 25
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tracking.flush_interval_secs, 10);
        // Unspecified fields keep their defaults
        assert_eq!(config.tracking.location_ttl_secs, 300);
        assert_eq!(config.optimizer.avg_speed_kmh, 25.0);
        assert_eq!(config.optimizer.traffic_cache_ttl_secs, 900);
    }
}
