//! Unified error types for the beaconscan core library.
//!
//! This module provides a unified error type [`BeaconError`] that covers all failure
//! modes across the beaconscan system. Each module also has its own specific error types
//! (`ConfigError`, `SessionError`, `SourceError`) for internal use.
//!
//! Denied permission and a powered-off radio are *not* errors: they are
//! steady states reported through [`crate::ScanStatus`]. The variants here
//! describe things that went wrong while talking to the Bluetooth stack,
//! loading configuration, or talking to a coordinator that has gone away.
//!
//! # Example
//!
//! ```rust
//! use beaconscan_core::error::BeaconError;
//! use beaconscan_core::SourceError;
//!
//! let err = BeaconError::from(SourceError::Subscribe {
//!     message: "adapter busy".into(),
//! });
//! assert_eq!(err.error_code(), "SUBSCRIPTION_FAILED");
//! assert!(err.is_recoverable());
//! ```

use thiserror::Error;

/// The unified error type for all beaconscan operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter could be opened.
    #[error(
        "Bluetooth adapter unavailable: {0}. Ensure bluetoothd is running and an adapter is present."
    )]
    BluetoothAdapterUnavailable(String),

    /// The location permission request failed outright.
    #[error("Permission request failed: {0}")]
    PermissionRequestFailed(String),

    /// A radio or ranging source rejected a subscription.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// A live ranging stream failed.
    #[error("Ranging stream terminated: {0}")]
    RangingStreamTerminated(String),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// A ranging session is already live.
    #[error("Ranging session is already running")]
    SessionAlreadyRunning,

    /// No regions are configured.
    #[error("No ranging regions configured. Add at least one [[regions]] entry.")]
    NoRegions,

    /// The coordinator task has shut down.
    #[error("Scan coordinator has shut down")]
    CoordinatorShutDown,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// The configuration file could not be read or written.
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

/// A specialized [`Result`] type for beaconscan operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Short alias for [`BeaconError`].
pub type Error = BeaconError;

impl BeaconError {
    /// Returns `true` if this error represents an expected operational state.
    ///
    /// Starting a session that is already running is a no-op, not a failure.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::SessionAlreadyRunning)
    }

    /// Returns `true` if the condition may clear without user intervention.
    ///
    /// Ranging failures recover on the next radio state transition.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionFailed(_) | Self::RangingStreamTerminated(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 503 Service Unavailable - Bluetooth stack or coordinator gone
            Self::BluetoothAdapterUnavailable(_)
            | Self::PermissionRequestFailed(_)
            | Self::SubscriptionFailed(_)
            | Self::RangingStreamTerminated(_)
            | Self::CoordinatorShutDown => 503,

            // 500 Internal Server Error - the server itself is misconfigured
            Self::SessionAlreadyRunning
            | Self::NoRegions
            | Self::ConfigParseError(_)
            | Self::ConfigValidationError(_)
            | Self::PersistenceError(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses and logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterUnavailable(_) => "BLUETOOTH_ADAPTER_UNAVAILABLE",
            Self::PermissionRequestFailed(_) => "PERMISSION_REQUEST_FAILED",
            Self::SubscriptionFailed(_) => "SUBSCRIPTION_FAILED",
            Self::RangingStreamTerminated(_) => "RANGING_STREAM_TERMINATED",
            Self::SessionAlreadyRunning => "SESSION_ALREADY_RUNNING",
            Self::NoRegions => "NO_REGIONS",
            Self::CoordinatorShutDown => "COORDINATOR_SHUT_DOWN",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => {
                Self::PersistenceError(format!("{} does not exist", path.display()))
            }
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::session::SessionError> for BeaconError {
    fn from(err: crate::session::SessionError) -> Self {
        use crate::session::SessionError;
        match err {
            SessionError::AlreadyRunning => Self::SessionAlreadyRunning,
            SessionError::NoRegions => Self::NoRegions,
            SessionError::Subscription(source) => source.into(),
        }
    }
}

impl From<crate::sources::SourceError> for BeaconError {
    fn from(err: crate::sources::SourceError) -> Self {
        use crate::sources::SourceError;
        match err {
            SourceError::AdapterUnavailable { message } => Self::BluetoothAdapterUnavailable(message),
            SourceError::PermissionRequest { message } => Self::PermissionRequestFailed(message),
            SourceError::Subscribe { message } => Self::SubscriptionFailed(message),
            SourceError::Stream { message } => Self::RangingStreamTerminated(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
