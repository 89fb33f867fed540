use thiserror::Error;

use crate::types::SampleType;

/// Errors that can occur while acquiring heart rate data
#[derive(Error, Debug)]
pub enum HeartRateError {
    /// Data was requested before authorization resolved to granted
    #[error("Not authorized - request authorization first")]
    NotAuthorized,

    /// The platform refused access to heart rate data
    #[error("Authorization denied")]
    AuthorizationDenied,

    /// The platform failed while processing the permission request
    #[error("Authorization failed: {0}")]
    AuthorizationError(String),

    /// The requested data type is not supported by the platform
    #[error("Data type not available: {0}")]
    TypeUnavailable(SampleType),

    /// The query succeeded but no sample exists yet
    #[error("No heart rate data available")]
    NoData,

    /// The platform health service reported a failure
    #[error("Platform error: {0}")]
    Platform(String),

    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// A heart rate measurement could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The provider already has a live subscription
    #[error("A subscription is already active - cancel it first")]
    SubscriptionActive,

    /// Provider configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for heart rate operations
pub type Result<T> = std::result::Result<T, HeartRateError>;

impl HeartRateError {
    /// Check if this error comes from the permission flow
    #[must_use]
    pub const fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Self::NotAuthorized | Self::AuthorizationDenied | Self::AuthorizationError(_)
        )
    }

    /// Check if this error originates in the platform health service
    #[must_use]
    pub const fn is_platform_error(&self) -> bool {
        matches!(
            self,
            Self::Platform(_) | Self::Ble(_) | Self::Timeout { .. } | Self::Protocol(_)
        )
    }

    /// Check if retrying the same call may succeed without any other change
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoData | Self::Timeout { .. } | Self::Platform(_) | Self::Protocol(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let denied = HeartRateError::AuthorizationDenied;
        assert!(denied.is_authorization_error());
        assert!(!denied.is_platform_error());
        assert!(!denied.is_recoverable());

        let no_data = HeartRateError::NoData;
        assert!(!no_data.is_authorization_error());
        assert!(!no_data.is_platform_error());
        assert!(no_data.is_recoverable());

        let timeout = HeartRateError::Timeout { timeout_ms: 5000 };
        assert!(timeout.is_platform_error());
        assert!(timeout.is_recoverable());

        assert!(!HeartRateError::TypeUnavailable(SampleType::HeartRate).is_recoverable());
        assert!(!HeartRateError::SubscriptionActive.is_platform_error());
    }

    #[test]
    fn test_error_display() {
        let error = HeartRateError::AuthorizationError("store unavailable".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Authorization failed"));
        assert!(error_string.contains("store unavailable"));

        let error = HeartRateError::TypeUnavailable(SampleType::Workout);
        assert_eq!(format!("{error}"), "Data type not available: workout");
    }
}
