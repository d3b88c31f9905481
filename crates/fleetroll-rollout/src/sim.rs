//! In-memory fleet for dry runs and tests.
//!
//! `SimulatedFleet` plays all three collaborator roles at once: it is the
//! registry, the launcher and the health oracle. Health of new members is
//! scripted per version. The fleet also tracks the lowest number of
//! serving members it ever had, so callers can check the capacity floor.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fleetroll_core::config::SimulationConfig;
use fleetroll_core::{
    CollaboratorError, ConfigError, FleetMember, HealthStatus, LifecycleState, MemberId,
};
use fleetroll_health::HealthOracle;

use crate::collaborators::{FleetRegistry, InstanceLauncher};

/// Health a member reports over successive checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthScript {
    Healthy,
    Unhealthy,
    Unknown,
    /// One status per check; the last one repeats.
    Sequence(Vec<HealthStatus>),
}

impl HealthScript {
    /// Status on the `n`-th check (0-based).
    pub fn at(&self, n: usize) -> HealthStatus {
        match self {
            HealthScript::Healthy => HealthStatus::Healthy,
            HealthScript::Unhealthy => HealthStatus::Unhealthy,
            HealthScript::Unknown => HealthStatus::Unknown,
            HealthScript::Sequence(steps) => steps
                .get(n)
                .or_else(|| steps.last())
                .copied()
                .unwrap_or(HealthStatus::Unknown),
        }
    }

    fn parse(field: &'static str, value: &str) -> Result<Self, ConfigError> {
        match value {
            "healthy" => Ok(HealthScript::Healthy),
            "unhealthy" => Ok(HealthScript::Unhealthy),
            "unknown" => Ok(HealthScript::Unknown),
            other => Err(ConfigError::Invalid {
                field,
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    running: BTreeMap<MemberId, FleetMember>,
    registered: BTreeSet<MemberId>,
    checks: HashMap<MemberId, usize>,
    reported_healthy: HashSet<MemberId>,
    scripts: HashMap<String, HealthScript>,
    member_scripts: HashMap<MemberId, HealthScript>,
    default_script: Option<HealthScript>,
    next_index: u32,
    clock: u64,
    launches: u32,
    fail_launch_after: Option<u32>,
    launch_delay: Option<Duration>,
    stuck_versions: HashSet<String>,
    unhealthy_after: Option<u32>,
    list_faults: u32,
    terminated: Vec<MemberId>,
    min_serving: Option<usize>,
}

impl SimState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn next_id(&mut self, fleet_id: &str) -> MemberId {
        self.next_index += 1;
        format!("{fleet_id}-{:04}", self.next_index)
    }

    /// Registered, running, and last reported healthy.
    fn serving(&self) -> usize {
        self.registered
            .iter()
            .filter(|id| self.running.contains_key(*id) && self.reported_healthy.contains(*id))
            .count()
    }

    fn observe_capacity(&mut self) {
        let serving = self.serving();
        self.min_serving = Some(self.min_serving.map_or(serving, |m| m.min(serving)));
    }

    fn script_for(&self, id: &str, version: &str) -> HealthScript {
        self.member_scripts
            .get(id)
            .or_else(|| self.scripts.get(version))
            .or(self.default_script.as_ref())
            .cloned()
            .unwrap_or(HealthScript::Healthy)
    }
}

pub struct SimulatedFleet {
    fleet_id: String,
    state: Mutex<SimState>,
}

impl SimulatedFleet {
    pub fn new(fleet_id: impl Into<String>) -> Self {
        Self {
            fleet_id: fleet_id.into(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Seed `count` serving members on `version`, oldest first.
    pub fn with_members(self, version: &str, count: u32) -> Self {
        {
            let mut st = self.lock();
            for _ in 0..count {
                let id = st.next_id(&self.fleet_id);
                let created_at = st.tick();
                let member = FleetMember {
                    lifecycle: LifecycleState::InService,
                    health: HealthStatus::Healthy,
                    ..FleetMember::provisioning(id.clone(), version, created_at)
                };
                st.registered.insert(id.clone());
                st.reported_healthy.insert(id.clone());
                st.running.insert(id, member);
            }
            st.observe_capacity();
        }
        self
    }

    /// Seed one serving member with an explicit id and creation time.
    pub fn with_member(self, id: &str, version: &str, created_at: u64) -> Self {
        {
            let mut st = self.lock();
            let member = FleetMember {
                lifecycle: LifecycleState::InService,
                health: HealthStatus::Healthy,
                ..FleetMember::provisioning(id, version, created_at)
            };
            st.clock = st.clock.max(created_at);
            st.registered.insert(id.to_string());
            st.reported_healthy.insert(id.to_string());
            st.running.insert(id.to_string(), member);
            st.observe_capacity();
        }
        self
    }

    /// Script the health of members launched on `version`.
    pub fn with_health(self, version: &str, script: HealthScript) -> Self {
        self.lock().scripts.insert(version.to_string(), script);
        self
    }

    /// Script the health of members launched on any unscripted version.
    pub fn with_default_health(self, script: HealthScript) -> Self {
        self.lock().default_script = Some(script);
        self
    }

    /// Let `n` launches succeed, then fail every further one.
    pub fn fail_launches_after(self, n: u32) -> Self {
        self.lock().fail_launch_after = Some(n);
        self
    }

    /// Make every launch take `delay` before it succeeds or fails.
    pub fn slow_launches(self, delay: Duration) -> Self {
        self.lock().launch_delay = Some(delay);
        self
    }

    /// Refuse to terminate members running `version`; they keep running.
    pub fn fail_terminate(self, version: &str) -> Self {
        self.lock().stuck_versions.insert(version.to_string());
        self
    }

    /// Let `n` launched members follow their script, then report every
    /// further launched member UNHEALTHY.
    pub fn unhealthy_launches_after(self, n: u32) -> Self {
        self.lock().unhealthy_after = Some(n);
        self
    }

    /// Fail the next `n` `list` calls with a transient error.
    pub fn fail_list(self, n: u32) -> Self {
        self.lock().list_faults = n;
        self
    }

    /// Build a fleet from the `[simulation]` section of `fleet.toml`.
    pub fn from_simulation(fleet_id: &str, sim: &SimulationConfig) -> Result<Self, ConfigError> {
        let base = match sim.health.as_deref() {
            Some(raw) => HealthScript::parse("simulation.health", raw)?,
            None => HealthScript::Healthy,
        };
        let script = match sim.unknown_polls.unwrap_or(0) {
            0 => base,
            n => {
                let mut steps = vec![HealthStatus::Unknown; n as usize];
                steps.push(base.at(0));
                HealthScript::Sequence(steps)
            }
        };

        let mut fleet = Self::new(fleet_id)
            .with_members(&sim.current_version, sim.members)
            .with_default_health(script);
        if let Some(n) = sim.fail_launch_after {
            fleet = fleet.fail_launches_after(n);
        }
        if let Some(n) = sim.registry_faults {
            fleet = fleet.fail_list(n);
        }
        Ok(fleet)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every running member, registered or not.
    pub fn members(&self) -> Vec<FleetMember> {
        let mut members: Vec<_> = self.lock().running.values().cloned().collect();
        members.sort_by(FleetMember::replacement_order);
        members
    }

    /// Running members on `version`.
    pub fn count_on(&self, version: &str) -> usize {
        self.lock()
            .running
            .values()
            .filter(|m| m.version == version)
            .count()
    }

    /// Ids terminated so far, in termination order.
    pub fn terminated(&self) -> Vec<MemberId> {
        self.lock().terminated.clone()
    }

    pub fn launches(&self) -> u32 {
        self.lock().launches
    }

    /// Lowest serving count observed since the fleet was built.
    pub fn min_serving(&self) -> usize {
        self.lock().min_serving.unwrap_or(0)
    }

    pub fn check_count(&self, id: &str) -> usize {
        self.lock().checks.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FleetRegistry for SimulatedFleet {
    async fn list(&self) -> Result<Vec<FleetMember>, CollaboratorError> {
        let mut st = self.lock();
        if st.list_faults > 0 {
            st.list_faults -= 1;
            return Err(CollaboratorError::Transient("registry throttled".into()));
        }
        let mut members: Vec<_> = st
            .registered
            .iter()
            .filter_map(|id| st.running.get(id))
            .cloned()
            .collect();
        members.sort_by(FleetMember::replacement_order);
        Ok(members)
    }

    async fn register(&self, member: &FleetMember) -> Result<(), CollaboratorError> {
        let mut st = self.lock();
        if !st.running.contains_key(&member.id) {
            return Err(CollaboratorError::Permanent(format!(
                "member {} is not running",
                member.id
            )));
        }
        st.registered.insert(member.id.clone());
        st.observe_capacity();
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), CollaboratorError> {
        let mut st = self.lock();
        st.registered.remove(id);
        st.observe_capacity();
        Ok(())
    }
}

#[async_trait]
impl InstanceLauncher for SimulatedFleet {
    async fn launch(&self, version: &str) -> Result<FleetMember, CollaboratorError> {
        let delay = self.lock().launch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut st = self.lock();
        if let Some(limit) = st.fail_launch_after {
            if st.launches >= limit {
                return Err(CollaboratorError::Permanent(format!(
                    "insufficient capacity to launch {version}"
                )));
            }
        }
        st.launches += 1;
        let id = st.next_id(&self.fleet_id);
        let created_at = st.tick();
        let member = FleetMember::provisioning(id.clone(), version, created_at);
        if st.unhealthy_after.is_some_and(|n| st.launches > n) {
            st.member_scripts.insert(id.clone(), HealthScript::Unhealthy);
        }
        st.running.insert(id.clone(), member.clone());
        debug!(member = %id, version, "simulated launch");
        Ok(member)
    }

    async fn terminate(&self, id: &str) -> Result<(), CollaboratorError> {
        let mut st = self.lock();
        if let Some(member) = st.running.get(id) {
            if st.stuck_versions.contains(&member.version) {
                return Err(CollaboratorError::Permanent(format!(
                    "member {id} did not stop"
                )));
            }
        }
        if st.running.remove(id).is_some() {
            st.terminated.push(id.to_string());
        }
        st.observe_capacity();
        Ok(())
    }
}

#[async_trait]
impl HealthOracle for SimulatedFleet {
    async fn check(&self, member: &FleetMember) -> Result<HealthStatus, CollaboratorError> {
        let mut st = self.lock();
        let Some(running) = st.running.get(&member.id) else {
            return Ok(HealthStatus::Unknown);
        };
        let version = running.version.clone();
        let n = {
            let count = st.checks.entry(member.id.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let status = st.script_for(&member.id, &version).at(n);
        if status == HealthStatus::Healthy {
            st.reported_healthy.insert(member.id.clone());
        } else {
            st.reported_healthy.remove(&member.id);
        }
        if let Some(m) = st.running.get_mut(&member.id) {
            m.health = status;
        }
        st.observe_capacity();
        Ok(status)
    }
}
