//! StateStore: redb-backed persistence for fleet rollouts.
//!
//! Provides typed operations over leases, deployment records and events.
//! Supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info, warn};

use fleetroll_core::epoch_millis;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Result of trying to take a fleet lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquire {
    /// The lease is now ours.
    Acquired(Lease),
    /// Another deployment holds the fleet.
    Held(Lease),
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Take the lease on `fleet_id` for `deployment_id`, unless someone holds it.
    ///
    /// Check and insert happen in one write transaction, so two callers can
    /// never both see `Acquired`.
    pub fn acquire_lease(&self, fleet_id: &str, deployment_id: &str) -> StateResult<LeaseAcquire> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let existing = match table.get(fleet_id).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<Lease>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                Some(holder) => LeaseAcquire::Held(holder),
                None => {
                    let lease = Lease {
                        fleet_id: fleet_id.to_string(),
                        deployment_id: deployment_id.to_string(),
                        acquired_at: epoch_millis(),
                    };
                    let value = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;
                    table
                        .insert(fleet_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    LeaseAcquire::Acquired(lease)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        match &result {
            LeaseAcquire::Acquired(_) => debug!(fleet = %fleet_id, deployment = %deployment_id, "lease acquired"),
            LeaseAcquire::Held(holder) => debug!(
                fleet = %fleet_id,
                holder = %holder.deployment_id,
                "lease held by another deployment"
            ),
        }
        Ok(result)
    }

    /// Release the lease if `deployment_id` holds it. Returns true if released.
    pub fn release_lease(&self, fleet_id: &str, deployment_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let holder = match table.get(fleet_id).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<Lease>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match holder {
                Some(lease) if lease.deployment_id == deployment_id => {
                    table.remove(fleet_id).map_err(map_err!(Write))?;
                    true
                }
                Some(lease) => {
                    warn!(
                        fleet = %fleet_id,
                        holder = %lease.deployment_id,
                        caller = %deployment_id,
                        "refusing to release lease held by another deployment"
                    );
                    false
                }
                None => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if released {
            debug!(fleet = %fleet_id, deployment = %deployment_id, "lease released");
        }
        Ok(released)
    }

    /// Get the current lease on a fleet, if any.
    pub fn get_lease(&self, fleet_id: &str) -> StateResult<Option<Lease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(fleet_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: Lease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    /// Drop a lease regardless of holder. Operator recovery after a crash.
    pub fn break_lease(&self, fleet_id: &str) -> StateResult<Option<Lease>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let removed = table.remove(fleet_id).map_err(map_err!(Write))?;
            match removed {
                Some(guard) => Some(
                    serde_json::from_slice::<Lease>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if let Some(lease) = &removed {
            info!(fleet = %fleet_id, holder = %lease.deployment_id, "lease broken");
        }
        Ok(removed)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, record: &DeploymentRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %record.id, status = ?record.status, "deployment record stored");
        Ok(())
    }

    /// Get a deployment record by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all deployment records, oldest first.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        results.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    /// List deployment records for one fleet, oldest first.
    pub fn list_deployments_for_fleet(&self, fleet_id: &str) -> StateResult<Vec<DeploymentRecord>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .filter(|r| r.fleet_id == fleet_id)
            .collect())
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append an event. Re-appending the same `(deployment, seq)` overwrites it.
    pub fn append_event(&self, event: &DeploymentEvent) -> StateResult<()> {
        let key = event.table_key();
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All events of a deployment in emission order.
    pub fn list_events(&self, deployment_id: &str) -> StateResult<Vec<DeploymentEvent>> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: DeploymentEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
            }
        }
        Ok(results)
    }
}
