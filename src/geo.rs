//! Spherical-earth helpers shared by the signal pipeline and the point graph.
//!
//! All distances use the haversine formula on a sphere of radius
//! [`EARTH_RADIUS_M`] (the WGS-84 equatorial radius). Stored project distances
//! were computed with this exact radius, so changing it breaks bit-exact
//! comparisons against persisted `totalDistance` snapshots.

/// Sphere radius used for every distance in the crate, in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Great-circle distance in meters between two `(lat, lng)` pairs in degrees.
pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1 * DEG_TO_RAD;
    let lat2_rad = lat2 * DEG_TO_RAD;
    let delta_lat = (lat2 - lat1) * DEG_TO_RAD;
    let delta_lng = (lng2 - lng1) * DEG_TO_RAD;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` to `to`, in degrees within `[0, 360)`.
pub fn bearing_deg(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1 * DEG_TO_RAD;
    let lat2_rad = lat2 * DEG_TO_RAD;
    let delta_lng = (lng2 - lng1) * DEG_TO_RAD;

    let y = delta_lng.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lng.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Absolute difference between two bearings, folded onto the shorter arc (0..=180).
pub fn bearing_difference_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_m((12.5, -45.0), (12.5, -45.0)), 0.0);
    }

    #[test]
    fn test_thousandth_degree_at_equator() {
        // 0.001° of arc on a 6,378,137 m sphere.
        let expected = EARTH_RADIUS_M * 0.001 * DEG_TO_RAD;
        let dist = haversine_m((0.0, 0.0), (0.0, 0.001));
        assert!((dist - expected).abs() < 1e-6, "got {dist}");
        assert!((dist - 111.32).abs() < 0.01);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = (48.8566, 2.3522);
        let b = (48.8570, 2.3530);
        assert!((haversine_m(a, b) - haversine_m(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_cardinal_bearings() {
        assert!((bearing_deg((0.0, 0.0), (1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((bearing_deg((0.0, 0.0), (0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((bearing_deg((0.0, 0.0), (-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing_deg((0.0, 0.0), (0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_difference_wraps() {
        assert_eq!(bearing_difference_deg(350.0, 10.0), 20.0);
        assert_eq!(bearing_difference_deg(10.0, 350.0), 20.0);
        assert_eq!(bearing_difference_deg(90.0, 270.0), 180.0);
        assert_eq!(bearing_difference_deg(45.0, 45.0), 0.0);
    }
}
