//! fleetroll-core: shared types and primitives for fleet rollouts.
//!
//! - **`types`**: fleet members, lifecycle and health states
//! - **`config`**: `fleet.toml` parsing
//! - **`duration`**: human duration strings ("5s", "500ms", "2m")
//! - **`retry`**: bounded exponential backoff for transient collaborator faults
//! - **`cancel`**: cooperative cancellation signal shared by the rollout loop

pub mod cancel;
pub mod config;
pub mod duration;
pub mod error;
pub mod retry;
pub mod types;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use config::FleetConfig;
pub use duration::parse_duration;
pub use error::{CollaboratorError, ConfigError};
pub use retry::RetryPolicy;
pub use types::*;
