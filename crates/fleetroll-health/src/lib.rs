//! fleetroll-health: deciding whether freshly launched members are healthy.
//!
//! # Architecture
//!
//! ```text
//! HealthPoller (one call per round)
//!   ├── HealthOracle::check(member) per member, issued concurrently each tick
//!   ├── HealthTracker per member (thresholds, UNKNOWN tolerance)
//!   └── PollReport { outcome, elapsed, polls, last_status }
//! ```
//!
//! The poll is bounded: it returns when every member is healthy, when one
//! member crosses its unhealthy threshold, when the round deadline passes,
//! or when cancellation is requested. UNKNOWN is never success or failure.

pub mod checker;
pub mod probe;
pub mod oracle;
pub mod poller;

pub use checker::HealthTracker;
pub use probe::HttpHealthOracle;
pub use oracle::HealthOracle;
pub use poller::{HealthPolicy, HealthPoller, PollOutcome, PollReport};
