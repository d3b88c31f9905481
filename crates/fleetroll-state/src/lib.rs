//! fleetroll-state: embedded state store for fleet rollouts.
//!
//! Backed by [redb](https://docs.rs/redb), persists the three things a
//! rollout must not lose track of:
//!
//! - **leases**: at most one active deployment per fleet
//! - **deployment records**: status, progress and terminal outcome
//! - **events**: the append-only, ordered log of what each deployment did
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{LeaseAcquire, StateStore};
pub use types::*;
