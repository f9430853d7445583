//! Error types for the Scaleway driver.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the Scaleway driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayDriverError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not available in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when a server settles in a state other than `running`.
    #[error("instance {instance} entered unexpected state {state}")]
    UnexpectedState {
        /// Instance name.
        instance: String,
        /// State reported by the provider.
        state: String,
    },
    /// Raised when a bounded wait runs out of attempts.
    #[error("timeout waiting for {action} on instance {instance}")]
    Timeout {
        /// Action being waited on.
        action: &'static str,
        /// Instance name.
        instance: String,
    },
    /// Raised when the run is cancelled during a wait.
    #[error("cancelled while waiting for {action} on instance {instance}")]
    Cancelled {
        /// Action being waited on.
        action: &'static str,
        /// Instance name.
        instance: String,
    },
    /// Raised when the connectivity probe fails in a non-retryable way.
    #[error("connectivity probe to {instance} failed: {message}")]
    Probe {
        /// Instance name.
        instance: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when an instance cannot be powered on.
    #[error("instance {instance} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Instance name.
        instance: String,
        /// Current state reported by the provider.
        state: String,
    },
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider.
        message: String,
    },
}

impl From<ConfigError> for ScalewayDriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
