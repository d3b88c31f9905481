//! Ordered deployment event emission.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use fleetroll_core::{DeploymentId, epoch_millis};
use fleetroll_state::{DeploymentEvent, EventKind, StateStore};

/// Per-deployment event sink. Persists each event, then broadcasts it.
///
/// Store and broadcast failures are logged and otherwise ignored; events
/// never feed back into orchestrator decisions.
pub struct EventLog {
    deployment_id: DeploymentId,
    next_seq: u64,
    store: StateStore,
    tx: broadcast::Sender<DeploymentEvent>,
}

impl EventLog {
    pub fn new(
        deployment_id: impl Into<DeploymentId>,
        store: StateStore,
        tx: broadcast::Sender<DeploymentEvent>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            next_seq: 0,
            store,
            tx,
        }
    }

    pub fn emit(&mut self, round: u32, kind: EventKind) -> DeploymentEvent {
        let event = DeploymentEvent {
            deployment_id: self.deployment_id.clone(),
            seq: self.next_seq,
            round,
            at: epoch_millis(),
            kind,
        };
        self.next_seq += 1;

        if let Err(e) = self.store.append_event(&event) {
            warn!(deployment = %self.deployment_id, seq = event.seq, error = %e, "failed to persist event");
        }
        debug!(deployment = %self.deployment_id, seq = event.seq, round, kind = ?event.kind, "event");
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn emitted(&self) -> u64 {
        self.next_seq
    }
}
