//! redb table definitions for the fleetroll state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Active fleet leases keyed by `{fleet_id}`.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Deployment events keyed by `{deployment_id}:{seq:010}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");
