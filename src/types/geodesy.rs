//! Great-circle helpers shared by the fusion engine and the predictor.
//!
//! Points are WGS84 degrees. Distances use the haversine formula on the mean
//! Earth radius, which is well inside GPS noise at the few-metre scales the
//! noise filter cares about.

use geo::{HaversineBearing, HaversineDistance, Point};

/// Metres per degree of latitude used for flat-earth extrapolation
pub const METERS_PER_DEGREE_LAT: f64 = 111_132.0;

/// Haversine distance in metres
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1, lat1);
    let to = Point::new(lon2, lat2);
    from.haversine_distance(&to)
}

/// Initial great-circle bearing from the first point to the second, in [0, 360)
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1, lat1);
    let to = Point::new(lon2, lat2);
    normalize_degrees(from.haversine_bearing(to))
}

/// Wrap any angle into [0, 360)
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180]
pub fn shortest_arc_deg(from: f64, to: f64) -> f64 {
    let diff = normalize_degrees(to - from);
    if diff > 180.0 {
        diff - 360.0
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_one_millidegree_of_latitude() {
        let d = distance_m(0.0, 0.0, 0.001, 0.0);
        assert_relative_eq!(d, 111.19, epsilon = 0.1);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        assert_relative_eq!(initial_bearing_deg(0.0, 0.0, 0.001, 0.0), 0.0, epsilon = 1e-6);
        assert_relative_eq!(initial_bearing_deg(0.0, 0.0, 0.0, 0.001), 90.0, epsilon = 1e-6);
        assert_relative_eq!(initial_bearing_deg(0.0, 0.0, -0.001, 0.0), 180.0, epsilon = 1e-6);
        assert_relative_eq!(initial_bearing_deg(0.0, 0.0, 0.0, -0.001), 270.0, epsilon = 1e-6);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_relative_eq!(normalize_degrees(-90.0), 270.0);
        assert_relative_eq!(normalize_degrees(720.0), 0.0);
        assert_relative_eq!(normalize_degrees(359.5), 359.5);
        assert!(normalize_degrees(-1e-15) < 360.0);
    }

    #[test]
    fn test_shortest_arc_wraps() {
        assert_relative_eq!(shortest_arc_deg(350.0, 10.0), 20.0);
        assert_relative_eq!(shortest_arc_deg(10.0, 350.0), -20.0);
        assert_relative_eq!(shortest_arc_deg(90.0, 100.0), 10.0);
    }
}
