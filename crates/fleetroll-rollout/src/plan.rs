//! Deployment plans: what to roll out, and how fast.
//!
//! The minimum healthy percentage is turned into an explicit batch size:
//! `B = max(1, floor(N × (100 − P) / 100))`, the number of members that may
//! be out of service at once while keeping at least P% of N serving.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetroll_core::config::resolve_duration;
use fleetroll_core::{ConfigError, FleetConfig, FleetMember, MemberId, RetryPolicy};
use fleetroll_health::HealthPolicy;

use crate::error::{DeployError, DeployResult};

/// Upper bound on every per-phase timing in a plan.
pub const MAX_PHASE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Immutable description of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub fleet_id: String,
    pub target_version: String,
    /// Desired total capacity N.
    pub capacity: u32,
    /// Minimum healthy percentage P, in (0, 100].
    pub min_healthy_percent: u32,
    /// Fixed grace period before the first health poll of a round.
    pub warmup: Duration,
    pub health: HealthPolicy,
    pub launch_timeout: Duration,
    pub terminate_timeout: Duration,
    /// Backoff for transient registry and terminate faults.
    pub retry: RetryPolicy,
}

impl DeploymentPlan {
    /// A plan with default timings.
    pub fn new(
        fleet_id: impl Into<String>,
        target_version: impl Into<String>,
        capacity: u32,
        min_healthy_percent: u32,
    ) -> Self {
        Self {
            fleet_id: fleet_id.into(),
            target_version: target_version.into(),
            capacity,
            min_healthy_percent,
            warmup: Duration::from_secs(30),
            health: HealthPolicy::default(),
            launch_timeout: Duration::from_secs(300),
            terminate_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build a plan from `fleet.toml`, applying defaults for omitted fields.
    pub fn from_config(config: &FleetConfig) -> Result<Self, ConfigError> {
        let d = &config.deployment;
        let defaults = Self::new(
            config.fleet.id.clone(),
            d.target_version.clone(),
            d.capacity,
            d.min_healthy_percent,
        );

        let health = HealthPolicy {
            poll_interval: resolve_duration(
                "deployment.poll_interval",
                d.poll_interval.as_deref(),
                defaults.health.poll_interval,
            )?,
            timeout: resolve_duration(
                "deployment.health_timeout",
                d.health_timeout.as_deref(),
                defaults.health.timeout,
            )?,
            unhealthy_threshold: d
                .unhealthy_threshold
                .unwrap_or(defaults.health.unhealthy_threshold),
            healthy_threshold: d
                .healthy_threshold
                .unwrap_or(defaults.health.healthy_threshold),
        };

        let retry = match &config.retry {
            Some(r) => RetryPolicy {
                attempts: r.attempts.unwrap_or(defaults.retry.attempts),
                base_delay: resolve_duration(
                    "retry.base_delay",
                    r.base_delay.as_deref(),
                    defaults.retry.base_delay,
                )?,
                max_delay: resolve_duration(
                    "retry.max_delay",
                    r.max_delay.as_deref(),
                    defaults.retry.max_delay,
                )?,
            },
            None => defaults.retry,
        };

        Ok(Self {
            warmup: resolve_duration("deployment.warmup", d.warmup.as_deref(), defaults.warmup)?,
            launch_timeout: resolve_duration(
                "deployment.launch_timeout",
                d.launch_timeout.as_deref(),
                defaults.launch_timeout,
            )?,
            terminate_timeout: resolve_duration(
                "deployment.terminate_timeout",
                d.terminate_timeout.as_deref(),
                defaults.terminate_timeout,
            )?,
            health,
            retry,
            ..defaults
        })
    }

    /// Check preconditions that must hold before any side effect.
    pub fn validate(&self) -> DeployResult<()> {
        if self.fleet_id.trim().is_empty() {
            return Err(DeployError::InvalidPlan("fleet id must not be empty".into()));
        }
        if self.target_version.trim().is_empty() {
            return Err(DeployError::InvalidPlan("target version must not be empty".into()));
        }
        if self.capacity < 1 {
            return Err(DeployError::InvalidPlan("capacity must be at least 1".into()));
        }
        if self.min_healthy_percent == 0 || self.min_healthy_percent > 100 {
            return Err(DeployError::InvalidPlan(format!(
                "min healthy percent must be in 1..=100, got {}",
                self.min_healthy_percent
            )));
        }
        if self.health.poll_interval.is_zero() {
            return Err(DeployError::InvalidPlan("poll interval must be positive".into()));
        }
        for (field, value) in [
            ("warmup", self.warmup),
            ("health timeout", self.health.timeout),
            ("poll interval", self.health.poll_interval),
            ("launch timeout", self.launch_timeout),
            ("terminate timeout", self.terminate_timeout),
            ("retry max delay", self.retry.max_delay),
        ] {
            if value > MAX_PHASE_DURATION {
                return Err(DeployError::InvalidPlan(format!(
                    "{field} of {value:?} exceeds {MAX_PHASE_DURATION:?}"
                )));
            }
        }
        Ok(())
    }

    /// Members that may be replaced at once.
    pub fn batch_size(&self) -> u32 {
        let n = u64::from(self.capacity);
        let p = u64::from(self.min_healthy_percent.min(100));
        let b = n * (100 - p) / 100;
        (b as u32).max(1)
    }

    /// Serving members that must exist at every instant: `ceil(N × P / 100)`.
    pub fn min_healthy_floor(&self) -> u32 {
        let n = u64::from(self.capacity);
        let p = u64::from(self.min_healthy_percent.min(100));
        (n * p).div_ceil(100) as u32
    }

    /// Rounds needed to replace `old_members` members.
    pub fn rounds_for(&self, old_members: usize) -> u32 {
        (old_members as u32).div_ceil(self.batch_size())
    }
}

/// Members still to be replaced, in replacement order.
///
/// Excludes members already on `target_version`, members that are draining
/// or terminated, and members this deployment already retired.
pub fn replacement_queue(
    members: &[FleetMember],
    target_version: &str,
    retired: &HashSet<MemberId>,
) -> Vec<FleetMember> {
    let mut queue: Vec<FleetMember> = members
        .iter()
        .filter(|m| m.version != target_version)
        .filter(|m| m.is_replaceable())
        .filter(|m| !retired.contains(&m.id))
        .cloned()
        .collect();
    queue.sort_by(FleetMember::replacement_order);
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetroll_core::LifecycleState;

    fn plan(n: u32, p: u32) -> DeploymentPlan {
        DeploymentPlan::new("web", "v2", n, p)
    }

    fn member(id: &str, version: &str, created_at: u64) -> FleetMember {
        FleetMember {
            lifecycle: LifecycleState::InService,
            ..FleetMember::provisioning(id, version, created_at)
        }
    }

    #[test]
    fn batch_size_examples() {
        assert_eq!(plan(10, 50).batch_size(), 5);
        assert_eq!(plan(4, 50).batch_size(), 2);
        assert_eq!(plan(2, 50).batch_size(), 1);
        assert_eq!(plan(10, 90).batch_size(), 1);
        assert_eq!(plan(10, 75).batch_size(), 2);
        assert_eq!(plan(7, 30).batch_size(), 4);
    }

    #[test]
    fn batch_size_is_at_least_one() {
        assert_eq!(plan(1, 100).batch_size(), 1);
        assert_eq!(plan(1, 50).batch_size(), 1);
        assert_eq!(plan(3, 99).batch_size(), 1);
    }

    #[test]
    fn batch_size_is_deterministic() {
        let p = plan(10, 50);
        assert_eq!(p.batch_size(), p.batch_size());
        assert_eq!(p.rounds_for(10), 2);
    }

    #[test]
    fn floor_rounds_up() {
        assert_eq!(plan(10, 50).min_healthy_floor(), 5);
        assert_eq!(plan(3, 50).min_healthy_floor(), 2);
        assert_eq!(plan(1, 1).min_healthy_floor(), 1);
        assert_eq!(plan(10, 100).min_healthy_floor(), 10);
    }

    #[test]
    fn uneven_fleet_gets_smaller_final_round() {
        let p = plan(7, 50);
        assert_eq!(p.batch_size(), 3);
        assert_eq!(p.rounds_for(7), 3);
    }

    #[test]
    fn validate_rejects_bad_plans() {
        assert!(plan(0, 50).validate().is_err());
        assert!(plan(4, 0).validate().is_err());
        assert!(plan(4, 101).validate().is_err());
        assert!(DeploymentPlan::new("web", "", 4, 50).validate().is_err());
        assert!(DeploymentPlan::new(" ", "v2", 4, 50).validate().is_err());
        assert!(plan(4, 100).validate().is_ok());
        assert!(plan(1, 1).validate().is_ok());
    }

    #[test]
    fn validate_caps_phase_durations() {
        let mut p = plan(4, 50);
        p.health.timeout = Duration::from_secs(u64::MAX);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("health timeout"), "{err}");

        let p = plan(4, 50).with_warmup(MAX_PHASE_DURATION + Duration::from_secs(1));
        assert!(p.validate().is_err());

        let mut p = plan(4, 50);
        p.launch_timeout = MAX_PHASE_DURATION;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn queue_is_oldest_first_and_skips_target_version() {
        let members = vec![
            member("c", "v1", 30),
            member("new", "v2", 5),
            member("a", "v1", 10),
            member("b", "v1", 10),
        ];
        let queue = replacement_queue(&members, "v2", &HashSet::new());
        let ids: Vec<_> = queue.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn queue_skips_draining_and_retired() {
        let mut draining = member("d", "v1", 1);
        draining.lifecycle = LifecycleState::Draining;
        let members = vec![draining, member("r", "v1", 2), member("k", "v1", 3)];
        let retired: HashSet<_> = ["r".to_string()].into_iter().collect();
        let queue = replacement_queue(&members, "v2", &retired);
        let ids: Vec<_> = queue.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["k"]);
    }

    #[test]
    fn from_config_applies_defaults_and_overrides() {
        let config = FleetConfig::from_toml_str(
            r#"
[fleet]
id = "web"

[deployment]
target_version = "v2"
capacity = 4
min_healthy_percent = 50
warmup = "10s"
poll_interval = "2s"
unhealthy_threshold = 2

[retry]
attempts = 5
"#,
        )
        .unwrap();
        let plan = DeploymentPlan::from_config(&config).unwrap();
        assert_eq!(plan.warmup, Duration::from_secs(10));
        assert_eq!(plan.health.poll_interval, Duration::from_secs(2));
        assert_eq!(plan.health.unhealthy_threshold, 2);
        assert_eq!(plan.health.healthy_threshold, 1);
        assert_eq!(plan.health.timeout, Duration::from_secs(300));
        assert_eq!(plan.retry.attempts, 5);
        assert_eq!(plan.retry.base_delay, RetryPolicy::default().base_delay);
        assert_eq!(plan.batch_size(), 2);
    }

    #[test]
    fn from_config_rejects_bad_duration() {
        let mut config = FleetConfig::scaffold("web", "v1", "v2");
        config.deployment.warmup = Some("a while".into());
        let err = DeploymentPlan::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("deployment.warmup"));
    }
}
