use log::trace;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::types::{FusedFix, METERS_PER_DEGREE_LAT};

/// Below this cosine the longitude delta is dropped (within ~0.06 m of a pole)
const MIN_LONGITUDE_SCALE: f64 = 1e-9;

/// Extrapolates the last fused fix along its bearing at its speed, so a renderer
/// polling at frame rate sees continuous movement between 1 Hz fixes.
///
/// Flat-earth approximation around the base fix; good for the couple of
/// seconds the prediction window allows.
#[derive(Clone, Debug)]
pub struct DeadReckoningPredictor {
    base: Option<FusedFix>,
    longitude_scale: f64,
    max_prediction_ms: f64,
    min_speed_mps: f64,
}

impl Default for DeadReckoningPredictor {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl DeadReckoningPredictor {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            base: None,
            longitude_scale: 1.0,
            max_prediction_ms: config.max_prediction_ms,
            min_speed_mps: config.min_prediction_speed,
        }
    }

    /// Replace the base with a newly published fix
    pub fn update(&mut self, fix: &FusedFix) {
        self.longitude_scale = fix.latitude.to_radians().cos();
        self.base = Some(*fix);
    }

    /// Position at `query_nanos` (same monotonic clock as the fixes).
    ///
    /// Returns `(0.0, 0.0)` before the first fix and the base position whenever
    /// extrapolation does not apply.
    pub fn predict(&self, query_nanos: i64) -> (f64, f64) {
        let Some(base) = self.base else {
            return (0.0, 0.0);
        };
        match self.extrapolate(&base, query_nanos) {
            Ok(position) => position,
            Err(e) => {
                trace!("holding base position: {e}");
                (base.latitude, base.longitude)
            }
        }
    }

    fn extrapolate(&self, base: &FusedFix, query_nanos: i64) -> TrackerResult<(f64, f64)> {
        let dt_ms = query_nanos.saturating_sub(base.timestamp_nanos) as f64 / 1e6;
        if !(0.0..=self.max_prediction_ms).contains(&dt_ms) {
            return Err(TrackerError::StaleClock { dt_ms });
        }
        if base.speed_mps < self.min_speed_mps {
            return Ok((base.latitude, base.longitude));
        }

        let distance_m = base.speed_mps * dt_ms / 1000.0;
        let bearing = base.bearing_deg.unwrap_or(0.0).to_radians();
        let north_m = distance_m * bearing.cos();
        let east_m = distance_m * bearing.sin();

        let d_lat = north_m / METERS_PER_DEGREE_LAT;
        let d_lon = if self.longitude_scale.abs() < MIN_LONGITUDE_SCALE {
            0.0
        } else {
            east_m / (METERS_PER_DEGREE_LAT * self.longitude_scale)
        };
        Ok((base.latitude + d_lat, base.longitude + d_lon))
    }

    /// Forget the base fix
    pub fn reset(&mut self) {
        self.base = None;
        self.longitude_scale = 1.0;
    }

    /// Accuracy radius of the base fix, 0.0 before the first fix
    pub fn last_accuracy_m(&self) -> f64 {
        self.base.map(|b| b.accuracy_m).unwrap_or(0.0)
    }

    pub fn last_known(&self) -> Option<(f64, f64)> {
        self.base.map(|b| (b.latitude, b.longitude))
    }
}
