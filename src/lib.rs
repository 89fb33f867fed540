#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Pulsewatch ❤️
//!
//! A heart rate data provider that hides where the numbers come from.
//!
//! The [`HeartRateProvider`] owns authorization state and the active data
//! stream. It runs in one of two modes, fixed at construction:
//!
//! - **Mock**: fabricates uniformly distributed readings (60–100 BPM by default)
//!   once per second. Useful for UI work and tests without hardware.
//! - **Live**: relays samples from a platform [`HealthService`]. The crate ships
//!   [`BleHealthService`], which reads any Bluetooth LE sensor exposing the
//!   standard Heart Rate Service, and [`InMemoryHealthService`], a scripted
//!   service for tests and demos.
//!
//! Readings and errors reach the caller through plain callbacks; there is no
//! global notification channel in between.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pulsewatch::{AuthorizationState, HeartRateProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = HeartRateProvider::mock();
//!
//!     if provider.request_authorization().await != AuthorizationState::Granted {
//!         return Ok(());
//!     }
//!
//!     let handle = provider
//!         .subscribe(
//!             |reading| println!("{reading}"),
//!             |error| eprintln!("Failed to get live updates: {error}"),
//!         )
//!         .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     provider.cancel(handle).await;
//!     Ok(())
//! }
//! ```

use uuid::Uuid;

/// Bluetooth LE health service for heart rate sensors
pub mod ble;
/// Error types and handling
pub mod error;
/// Platform health service abstraction
pub mod platform;
/// Heart Rate Measurement decoding
pub mod protocol;
/// The heart rate provider
pub mod provider;
/// Subscription handles
pub mod subscription;
/// Type definitions and data structures
pub mod types;

mod source;

// Re-export the main types for convenient usage
pub use ble::BleHealthService;
pub use error::{HeartRateError, Result};
pub use platform::{ChangeStream, HealthService, InMemoryHealthService, PermissionResponse};
pub use provider::HeartRateProvider;
pub use subscription::SubscriptionHandle;
pub use types::{
    AccessRequest, AuthorizationState, ProviderConfig, ProviderMode, ProviderState, Reading,
    Sample, SampleType, ScanParams,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bluetooth SIG Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Bluetooth SIG Heart Rate Measurement characteristic UUID (0x2A37)
///
/// Notify-only; every notification carries one measurement.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);
