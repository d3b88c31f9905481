//! Per-member health tracking.
//!
//! Turns a stream of oracle observations into a verdict using consecutive
//! thresholds. UNKNOWN breaks a healthy streak but never counts as a failure.

use tracing::{debug, warn};

use fleetroll_core::HealthStatus;

/// Tracks consecutive observations for a single member.
#[derive(Debug)]
pub struct HealthTracker {
    /// Current verdict. `Unknown` until a threshold is crossed.
    status: HealthStatus,
    /// Consecutive UNHEALTHY observations.
    consecutive_failures: u32,
    /// Consecutive HEALTHY observations.
    consecutive_successes: u32,
    /// Failures before the member is declared unhealthy.
    unhealthy_threshold: u32,
    /// Successes before the member is declared healthy.
    healthy_threshold: u32,
    /// Total observations recorded.
    observations: u32,
}

impl HealthTracker {
    /// Create a tracker. Thresholds below 1 are raised to 1.
    pub fn new(unhealthy_threshold: u32, healthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
            observations: 0,
        }
    }

    /// Record an observation and return the new verdict.
    ///
    /// An UNHEALTHY verdict is final.
    pub fn record(&mut self, observed: HealthStatus) -> HealthStatus {
        self.observations += 1;
        if self.status == HealthStatus::Unhealthy {
            return self.status;
        }

        match observed {
            HealthStatus::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.healthy_threshold {
                    if self.status != HealthStatus::Healthy {
                        debug!(successes = self.consecutive_successes, "member passed health threshold");
                    }
                    self.status = HealthStatus::Healthy;
                } else {
                    self.status = HealthStatus::Unknown;
                }
            }
            HealthStatus::Unhealthy => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.unhealthy_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.unhealthy_threshold,
                        "member marked unhealthy"
                    );
                    self.status = HealthStatus::Unhealthy;
                } else {
                    self.status = HealthStatus::Unknown;
                }
            }
            HealthStatus::Unknown => {
                self.consecutive_successes = 0;
                self.status = HealthStatus::Unknown;
            }
        }

        self.status
    }

    /// Current verdict.
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }
}
