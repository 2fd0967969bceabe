use nalgebra::{Quaternion, UnitQuaternion};

use crate::types::{normalize_degrees, shortest_arc_deg, RotationVectorSample};

/// Exponential smoothing of the absolute-orientation azimuth into a compass bearing.
///
/// Each new sample moves the bearing by `alpha` of the shortest arc towards it,
/// so with the default 0.1 a single jittery sample barely moves the output and
/// a 359° → 1° crossing stays near north instead of swinging through 180°.
pub struct HeadingFilter {
    alpha: f64,
    bearing: Option<f64>,
    samples: u64,
}

impl HeadingFilter {
    /// Create a filter with the given weight for new samples (clamped to [0, 1])
    pub fn new(alpha: f64) -> Self {
        HeadingFilter {
            alpha: alpha.clamp(0.0, 1.0),
            bearing: None,
            samples: 0,
        }
    }

    /// Feed a raw azimuth (degrees, may be negative); returns the smoothed bearing in [0, 360)
    pub fn update(&mut self, raw_azimuth_deg: f64) -> f64 {
        if !raw_azimuth_deg.is_finite() {
            return self.bearing.unwrap_or(0.0);
        }
        let raw = normalize_degrees(raw_azimuth_deg);
        let smoothed = match self.bearing {
            None => raw,
            Some(prev) => normalize_degrees(prev + self.alpha * shortest_arc_deg(prev, raw)),
        };
        self.bearing = Some(smoothed);
        self.samples += 1;
        smoothed
    }

    /// Current compass bearing, once at least one sample arrived
    pub fn current(&self) -> Option<f64> {
        self.bearing
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        self.bearing = None;
        self.samples = 0;
    }
}

/// Azimuth in degrees (-180, 180] of a rotation-vector sample.
///
/// The sample rotates device coordinates into East-North-Up; the azimuth is the
/// angle between magnetic north and the device's y axis projected on the
/// horizontal plane, i.e. `atan2(R[0][1], R[1][1])` of the rotation matrix.
pub fn azimuth_from_rotation_vector(sample: &RotationVectorSample) -> Option<f64> {
    let q = Quaternion::new(sample.w, sample.x, sample.y, sample.z);
    if !q.coords.iter().all(|c| c.is_finite()) || q.norm() < 1e-9 {
        return None;
    }
    let rotation = UnitQuaternion::from_quaternion(q).to_rotation_matrix();
    let m = rotation.matrix();
    Some(m[(0, 1)].atan2(m[(1, 1)]).to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_sample_seeds_bearing() {
        let mut filter = HeadingFilter::new(0.1);
        assert!(filter.current().is_none());
        assert_relative_eq!(filter.update(45.0), 45.0);
        assert_eq!(filter.samples(), 1);
    }

    #[test]
    fn test_negative_azimuth_is_normalized() {
        let mut filter = HeadingFilter::new(0.1);
        assert_relative_eq!(filter.update(-90.0), 270.0);
    }

    #[test]
    fn test_heavy_smoothing_resists_single_jitter() {
        let mut filter = HeadingFilter::new(0.1);
        filter.update(90.0);
        // 90 * 0.9 + 130 * 0.1 = 94
        assert_relative_eq!(filter.update(130.0), 94.0, epsilon = 1e-9);
        // 94 * 0.9 + 90 * 0.1 = 93.6
        assert_relative_eq!(filter.update(90.0), 93.6, epsilon = 1e-9);
    }

    #[test]
    fn test_smoothing_crosses_north_along_short_arc() {
        let mut filter = HeadingFilter::new(0.1);
        filter.update(355.0);
        let bearing = filter.update(5.0);
        assert_relative_eq!(bearing, 356.0, epsilon = 1e-9);
    }

    #[test]
    fn test_converges_to_steady_input() {
        let mut filter = HeadingFilter::new(0.1);
        filter.update(0.0);
        let mut bearing = 0.0;
        for _ in 0..200 {
            bearing = filter.update(120.0);
        }
        assert_relative_eq!(bearing, 120.0, epsilon = 1e-3);
    }

    #[test]
    fn test_non_finite_sample_is_ignored() {
        let mut filter = HeadingFilter::new(0.1);
        filter.update(10.0);
        assert_relative_eq!(filter.update(f64::NAN), 10.0);
        assert_eq!(filter.samples(), 1);
    }

    #[test]
    fn test_reset_clears_bearing() {
        let mut filter = HeadingFilter::new(0.1);
        filter.update(10.0);
        filter.reset();
        assert!(filter.current().is_none());
    }

    #[test]
    fn test_identity_rotation_points_north() {
        let sample = RotationVectorSample::new(0.0, 0.0, 0.0, 1.0, 0);
        assert_relative_eq!(azimuth_from_rotation_vector(&sample).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_counter_clockwise_yaw_points_west() {
        // 90° about the up axis turns the device's y axis from north to west
        let half = std::f64::consts::FRAC_PI_4;
        let sample = RotationVectorSample::new(0.0, 0.0, half.sin(), half.cos(), 0);
        let azimuth = azimuth_from_rotation_vector(&sample).unwrap();
        assert_relative_eq!(normalize_degrees(azimuth), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_rotation_vector() {
        let zero = RotationVectorSample::new(0.0, 0.0, 0.0, 0.0, 0);
        assert!(azimuth_from_rotation_vector(&zero).is_none());
        let nan = RotationVectorSample::new(f64::NAN, 0.0, 0.0, 1.0, 0);
        assert!(azimuth_from_rotation_vector(&nan).is_none());
    }
}
