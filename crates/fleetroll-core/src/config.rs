//! fleet.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub fleet: FleetSection,
    pub deployment: DeploymentConfig,
    pub retry: Option<RetryConfig>,
    pub health: Option<HttpHealthConfig>,
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSection {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub target_version: String,
    pub capacity: u32,
    pub min_healthy_percent: u32,
    pub warmup: Option<String>,
    pub health_timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub unhealthy_threshold: Option<u32>,
    pub healthy_threshold: Option<u32>,
    pub launch_timeout: Option<String>,
    pub terminate_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: Option<u32>,
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpHealthConfig {
    pub endpoint: Option<String>,
    pub timeout: Option<String>,
}

/// Describes an in-memory fleet for dry runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Version every seeded member starts on.
    pub current_version: String,
    /// Number of seeded members.
    pub members: u32,
    /// Health of newly launched members: "healthy", "unhealthy" or "unknown".
    pub health: Option<String>,
    /// UNKNOWN reports a new member gives before its scripted health.
    pub unknown_polls: Option<u32>,
    /// Launches that succeed before every further launch fails.
    pub fail_launch_after: Option<u32>,
    /// Transient registry faults injected before `list` succeeds.
    pub registry_faults: Option<u32>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Scaffold a fleet.toml with a simulated fleet on `current_version`.
    ///
    /// The simulated fleet answers health checks itself, so no `[health]`
    /// section is written.
    pub fn scaffold(fleet_id: &str, current_version: &str, target_version: &str) -> Self {
        FleetConfig {
            fleet: FleetSection {
                id: fleet_id.to_string(),
            },
            deployment: DeploymentConfig {
                target_version: target_version.to_string(),
                capacity: 4,
                min_healthy_percent: 50,
                warmup: Some("30s".to_string()),
                health_timeout: Some("5m".to_string()),
                poll_interval: Some("5s".to_string()),
                unhealthy_threshold: Some(1),
                healthy_threshold: Some(1),
                launch_timeout: Some("5m".to_string()),
                terminate_timeout: Some("2m".to_string()),
            },
            retry: Some(RetryConfig {
                attempts: Some(3),
                base_delay: Some("200ms".to_string()),
                max_delay: Some("5s".to_string()),
            }),
            health: None,
            simulation: Some(SimulationConfig {
                current_version: current_version.to_string(),
                members: 4,
                health: Some("healthy".to_string()),
                unknown_polls: None,
                fail_launch_after: None,
                registry_faults: None,
            }),
        }
    }
}

/// Resolve an optional duration field, falling back to `default`.
pub fn resolve_duration(
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::Duration {
            field,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_roundtrips_through_toml() {
        let config = FleetConfig::scaffold("web", "v1", "v2");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("target_version = \"v2\""));

        assert!(!toml_str.contains("[health]"));

        let back = FleetConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back.fleet.id, "web");
        assert!(back.health.is_none());
        assert_eq!(back.simulation.unwrap().current_version, "v1");
    }

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
[fleet]
id = "api"

[deployment]
target_version = "2024.06.1"
capacity = 10
min_healthy_percent = 90
"#;
        let config = FleetConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.fleet.id, "api");
        assert_eq!(config.deployment.capacity, 10);
        assert!(config.deployment.warmup.is_none());
        assert!(config.retry.is_none());
        assert!(config.simulation.is_none());
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let err = FleetConfig::from_toml_str("[fleet]\nid = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn resolve_duration_defaults_and_errors() {
        let d = resolve_duration("warmup", None, Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(7));

        let d = resolve_duration("warmup", Some("250ms"), Duration::ZERO).unwrap();
        assert_eq!(d, Duration::from_millis(250));

        let err = resolve_duration("warmup", Some("later"), Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("warmup"));

        let err = resolve_duration("warmup", Some("307445734561825861m"), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "warmup", .. }));
    }
}
