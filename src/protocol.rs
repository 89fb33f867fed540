use bytes::Buf;

use crate::error::{HeartRateError, Result};

/// Flag bit: heart rate value is a little-endian u16 instead of a u8
pub const FLAG_VALUE_FORMAT_U16: u8 = 0x01;

/// Flag bit: sensor contact was detected
pub const FLAG_SENSOR_CONTACT_DETECTED: u8 = 0x02;

/// Flag bit: the sensor supports contact detection
pub const FLAG_SENSOR_CONTACT_SUPPORTED: u8 = 0x04;

/// Flag bit: energy expended field is present
pub const FLAG_ENERGY_EXPENDED_PRESENT: u8 = 0x08;

/// Flag bit: one or more RR intervals follow
pub const FLAG_RR_INTERVALS_PRESENT: u8 = 0x10;

/// Resolution of an RR interval value (1/1024 second)
pub const RR_INTERVAL_RESOLUTION: f64 = 1024.0;

/// Skin contact as reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorContact {
    /// The sensor cannot detect contact
    NotSupported,
    /// Contact supported but currently lost
    NotDetected,
    /// Sensor is in contact with the skin
    Detected,
}

impl SensorContact {
    const fn from_flags(flags: u8) -> Self {
        if flags & FLAG_SENSOR_CONTACT_SUPPORTED == 0 {
            Self::NotSupported
        } else if flags & FLAG_SENSOR_CONTACT_DETECTED == 0 {
            Self::NotDetected
        } else {
            Self::Detected
        }
    }
}

/// A decoded Heart Rate Measurement characteristic value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute
    pub bpm: u16,
    /// Skin contact status
    pub sensor_contact: SensorContact,
    /// Accumulated energy expended in kilojoules
    pub energy_expended_kj: Option<u16>,
    /// RR intervals in units of 1/1024 second
    pub rr_intervals: Vec<u16>,
}

impl HeartRateMeasurement {
    /// Whether the measurement describes an actual heartbeat
    ///
    /// Sensors keep notifying with zero or stale values when they lose skin contact.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.bpm > 0 && self.sensor_contact != SensorContact::NotDetected
    }

    /// RR intervals converted to milliseconds
    #[must_use]
    pub fn rr_intervals_ms(&self) -> Vec<f64> {
        self.rr_intervals
            .iter()
            .map(|&rr| f64::from(rr) * 1000.0 / RR_INTERVAL_RESOLUTION)
            .collect()
    }
}

/// Decode a Heart Rate Measurement notification
///
/// # Errors
///
/// Returns [`HeartRateError::Protocol`] if the payload is empty, truncated,
/// or carries a dangling RR interval byte.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Result<HeartRateMeasurement> {
    let mut buf = data;

    if !buf.has_remaining() {
        return Err(HeartRateError::Protocol(
            "Empty heart rate measurement".to_string(),
        ));
    }

    let flags = buf.get_u8();

    let bpm = if flags & FLAG_VALUE_FORMAT_U16 == 0 {
        ensure_remaining(buf, 1, "heart rate value")?;
        u16::from(buf.get_u8())
    } else {
        ensure_remaining(buf, 2, "heart rate value")?;
        buf.get_u16_le()
    };

    let energy_expended_kj = if flags & FLAG_ENERGY_EXPENDED_PRESENT == 0 {
        None
    } else {
        ensure_remaining(buf, 2, "energy expended")?;
        Some(buf.get_u16_le())
    };

    let mut rr_intervals = Vec::new();
    if flags & FLAG_RR_INTERVALS_PRESENT != 0 {
        if buf.remaining() % 2 != 0 {
            return Err(HeartRateError::Protocol(format!(
                "RR interval field has odd length {}",
                buf.remaining()
            )));
        }
        while buf.has_remaining() {
            rr_intervals.push(buf.get_u16_le());
        }
    }

    Ok(HeartRateMeasurement {
        bpm,
        sensor_contact: SensorContact::from_flags(flags),
        energy_expended_kj,
        rr_intervals,
    })
}

fn ensure_remaining(buf: &[u8], needed: usize, field: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(HeartRateError::Protocol(format!(
            "Truncated {field}: need {needed} byte(s), have {}",
            buf.remaining()
        )));
    }
    Ok(())
}
