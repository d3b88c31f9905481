//! Error types shared by collaborators and configuration.

use thiserror::Error;

/// Failure reported by an external collaborator (registry, launcher, oracle).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// A fault that may clear on retry (throttling, connection reset).
    #[error("transient: {0}")]
    Transient(String),

    /// A fault that will not clear on retry.
    #[error("{0}")]
    Permanent(String),

    /// The call did not complete within its time budget.
    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

/// Errors raised while loading or resolving `fleet.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid value for `{field}`: {value:?}")]
    Invalid { field: &'static str, value: String },
}
