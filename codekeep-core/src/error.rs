//! Error types for codekeep operations

use thiserror::Error;

/// Remote store errors.
///
/// Absence of a record is never an error; lookups report it as `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    #[error("Connection timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Store is offline and the offline queue is disabled")]
    Offline,

    #[error("Command {command} failed: {reason}")]
    Command { command: String, reason: String },
}

impl StoreError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// True for failures caused by reachability rather than by the command.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectTimeout { .. } | Self::Offline
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No store endpoint configured: set either a url or a sentinel list")]
    MissingEndpoint,

    #[error("Both a url and a sentinel list are configured; choose one")]
    ConflictingEndpoints,

    #[error("Sentinel topology requires a monitored group name")]
    MissingSentinelName,

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Master error type for all codekeep errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodekeepError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for codekeep operations.
pub type CodekeepResult<T> = Result<T, CodekeepError>;

// =============================================================================
// TESTS
// =============================================================================
