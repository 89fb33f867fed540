use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};

use crate::error::{HeartRateError, Result};

/// Lower bound of the physiologically plausible heart rate range (BPM)
pub const MIN_PLAUSIBLE_BPM: f64 = 30.0;

/// Upper bound of the physiologically plausible heart rate range (BPM)
pub const MAX_PLAUSIBLE_BPM: f64 = 220.0;

/// Data types the provider may name when talking to a health service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    /// Heart rate samples in beats per minute
    HeartRate,
    /// Workout sessions
    Workout,
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartRate => write!(f, "heart rate"),
            Self::Workout => write!(f, "workout"),
        }
    }
}

/// A single heart rate reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    bpm: f64,
    timestamp: SystemTime,
}

impl Reading {
    /// Create a reading stamped with the current time
    #[must_use]
    pub fn new(bpm: f64) -> Self {
        Self::at(bpm, SystemTime::now())
    }

    /// Create a reading with an explicit timestamp
    #[must_use]
    pub const fn at(bpm: f64, timestamp: SystemTime) -> Self {
        Self { bpm, timestamp }
    }

    /// Beats per minute
    #[must_use]
    pub const fn bpm(&self) -> f64 {
        self.bpm
    }

    /// When the reading was taken
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Whether the value falls in the plausible human range
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        (MIN_PLAUSIBLE_BPM..=MAX_PLAUSIBLE_BPM).contains(&self.bpm)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0} BPM", self.bpm)
    }
}

/// Outcome of a permission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationState {
    /// Access to heart rate data was granted
    Granted,
    /// Access was refused
    Denied,
    /// The permission request failed
    Error(String),
}

impl AuthorizationState {
    /// Check if access was granted
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Convert the outcome into a result, mapping refusals to errors
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::AuthorizationDenied`] for [`AuthorizationState::Denied`]
    /// and [`HeartRateError::AuthorizationError`] for [`AuthorizationState::Error`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Granted => Ok(()),
            Self::Denied => Err(HeartRateError::AuthorizationDenied),
            Self::Error(reason) => Err(HeartRateError::AuthorizationError(reason)),
        }
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "Granted"),
            Self::Denied => write!(f, "Denied"),
            Self::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Lifecycle of the provider's authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderState {
    /// Authorization has not been requested
    Uninitialized,
    /// Waiting for the platform to answer
    AuthorizationPending,
    /// The platform answered
    Resolved(AuthorizationState),
}

impl ProviderState {
    /// Check if data operations are allowed
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Resolved(AuthorizationState::Granted))
    }
}

/// Where the provider gets its numbers from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Synthetic random readings
    #[default]
    Mock,
    /// Readings from a platform health service
    Live,
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// A value reported by a health service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sample value in the type's unit (BPM for heart rate)
    pub value: f64,
    /// When the sample was recorded
    pub timestamp: SystemTime,
}

impl Sample {
    /// Create a sample stamped with the current time
    #[must_use]
    pub fn now(value: f64) -> Self {
        Self {
            value,
            timestamp: SystemTime::now(),
        }
    }
}

impl From<Sample> for Reading {
    fn from(sample: Sample) -> Self {
        Self::at(sample.value, sample.timestamp)
    }
}

/// Data types a permission request asks to read and write
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Types to read
    pub read: Vec<SampleType>,
    /// Types to write
    pub write: Vec<SampleType>,
}

impl AccessRequest {
    /// Read-only access to heart rate samples
    #[must_use]
    pub fn heart_rate_read() -> Self {
        Self {
            read: vec![SampleType::HeartRate],
            write: Vec::new(),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Acquisition strategy
    pub mode: ProviderMode,
    /// Mock delivery cadence in milliseconds
    pub mock_interval_ms: u64,
    /// Lowest synthetic value (BPM)
    pub mock_min_bpm: f64,
    /// Highest synthetic value (BPM)
    pub mock_max_bpm: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Mock,
            mock_interval_ms: 1_000,
            mock_min_bpm: 60.0,
            mock_max_bpm: 100.0,
        }
    }
}

impl ProviderConfig {
    /// Default configuration for the given mode
    #[must_use]
    pub fn with_mode(mode: ProviderMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Check the configuration for values the provider cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::InvalidConfiguration`] for a zero interval,
    /// bounds outside the plausible heart rate range, or a minimum above the
    /// maximum.
    pub fn validate(&self) -> Result<()> {
        if self.mock_interval_ms == 0 {
            return Err(HeartRateError::InvalidConfiguration(
                "mock_interval_ms must be greater than zero".to_string(),
            ));
        }

        let plausible = MIN_PLAUSIBLE_BPM..=MAX_PLAUSIBLE_BPM;
        if !plausible.contains(&self.mock_min_bpm) || !plausible.contains(&self.mock_max_bpm) {
            return Err(HeartRateError::InvalidConfiguration(format!(
                "mock BPM bounds must lie within {MIN_PLAUSIBLE_BPM}-{MAX_PLAUSIBLE_BPM}, got {}-{}",
                self.mock_min_bpm, self.mock_max_bpm
            )));
        }

        if self.mock_min_bpm > self.mock_max_bpm {
            return Err(HeartRateError::InvalidConfiguration(format!(
                "mock_min_bpm ({}) exceeds mock_max_bpm ({})",
                self.mock_min_bpm, self.mock_max_bpm
            )));
        }

        Ok(())
    }
}

/// Scan and connection parameters for Bluetooth heart rate sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    /// How long to scan for sensors in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Only connect to a sensor whose name contains this string
    pub device_name: Option<String>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
            device_name: None,
        }
    }
}
