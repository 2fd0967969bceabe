pub mod geodesy;

pub use geodesy::*;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// Absolute position fix as delivered by the position provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed_mps: f64,
    #[serde(default)]
    pub bearing_deg: Option<f64>,
    #[serde(default)]
    pub accuracy_m: f64,
    /// Monotonic timestamp of the fix
    pub timestamp_nanos: i64,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, timestamp_nanos: i64) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps: 0.0,
            bearing_deg: None,
            accuracy_m: 0.0,
            timestamp_nanos,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = speed_mps;
        self
    }

    pub fn with_bearing(mut self, bearing_deg: f64) -> Self {
        self.bearing_deg = Some(bearing_deg);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = accuracy_m;
        self
    }

    pub fn has_bearing(&self) -> bool {
        self.bearing_deg.is_some()
    }

    /// Reject fixes that would corrupt the fused state.
    pub fn validate(&self) -> TrackerResult<()> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(TrackerError::InvalidFix(format!(
                "non-finite coordinates ({}, {})",
                self.latitude, self.longitude
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(TrackerError::InvalidFix(format!(
                "coordinates out of range ({}, {})",
                self.latitude, self.longitude
            )));
        }
        if !self.speed_mps.is_finite() || self.speed_mps < 0.0 {
            return Err(TrackerError::InvalidFix(format!("bad speed {}", self.speed_mps)));
        }
        if !self.accuracy_m.is_finite() || self.accuracy_m < 0.0 {
            return Err(TrackerError::InvalidFix(format!("bad accuracy {}", self.accuracy_m)));
        }
        if let Some(bearing) = self.bearing_deg {
            if !bearing.is_finite() {
                return Err(TrackerError::InvalidFix("non-finite bearing".to_string()));
            }
        }
        Ok(())
    }

    pub fn distance_to(&self, other: &RawFix) -> f64 {
        distance_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    pub fn bearing_to(&self, other: &RawFix) -> f64 {
        initial_bearing_deg(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Why a fused fix was published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixSource {
    /// Provider's last-known fix, published when the session opens
    Cache,
    /// Passed the noise filter
    Valid,
    /// Subject just stopped; position snapped to the previous fix
    Stop,
    /// Heartbeat after too many discarded fixes
    Forced,
}

/// Where the published bearing came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BearingOrigin {
    Raw,
    Calculated,
    Compass,
    None,
}

/// Fix after noise filtering and bearing fusion. Handed out by copy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedFix {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mps: f64,
    pub bearing_deg: Option<f64>,
    pub accuracy_m: f64,
    pub timestamp_nanos: i64,
    pub source: FixSource,
    pub bearing_origin: BearingOrigin,
}

impl FusedFix {
    pub fn from_raw(fix: &RawFix, source: FixSource, bearing_origin: BearingOrigin) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed_mps: fix.speed_mps,
            bearing_deg: fix.bearing_deg,
            accuracy_m: fix.accuracy_m,
            timestamp_nanos: fix.timestamp_nanos,
            source,
            bearing_origin,
        }
    }

    pub fn distance_to(&self, fix: &RawFix) -> f64 {
        distance_m(self.latitude, self.longitude, fix.latitude, fix.longitude)
    }

    pub fn bearing_to(&self, fix: &RawFix) -> f64 {
        initial_bearing_deg(self.latitude, self.longitude, fix.latitude, fix.longitude)
    }
}

/// Linear acceleration sample (gravity removed when the platform offers it)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp_nanos: i64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_nanos: i64) -> Self {
        Self { x, y, z, timestamp_nanos }
    }

    pub fn magnitude(&self) -> f64 {
        Vector3::new(self.x, self.y, self.z).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Rotation-vector sample: unit quaternion from device frame to East-North-Up
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationVectorSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
    pub timestamp_nanos: i64,
}

impl RotationVectorSample {
    pub fn new(x: f64, y: f64, z: f64, w: f64, timestamp_nanos: i64) -> Self {
        Self { x, y, z, w, timestamp_nanos }
    }
}

/// Position sensor duty-cycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// Normal duty cycle
    #[default]
    Active,
    /// Provider still polled, publication gated on confidence
    SoftSleep,
    /// Provider stopped until physical motion is detected
    HardSleep,
}
