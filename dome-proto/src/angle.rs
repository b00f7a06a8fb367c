//! Azimuth arithmetic in degrees that respects the 0°/360° wrap.

/// Return `angle1 - angle2` wrapped into the range (-180, 180] degrees.
///
/// Differences already inside the range are returned untouched, so exact
/// boundaries such as `7.1 - 0.0` are not perturbed by a round trip through
/// the modulo.
pub fn angle_diff(angle1: f64, angle2: f64) -> f64 {
    let diff = angle1 - angle2;
    if diff > -180.0 && diff <= 180.0 {
        return diff;
    }
    let wrapped = diff.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Wrap an azimuth into the range [0, 360) degrees.
pub fn wrap_azimuth(azimuth: f64) -> f64 {
    let wrapped = azimuth.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// True if two angles differ by no more than `max_diff` degrees, ignoring wrap.
pub fn angles_almost_equal(angle1: f64, angle2: f64, max_diff: f64) -> bool {
    angle_diff(angle1, angle2).abs() <= max_diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_angle_diff_in_range() {
        assert_eq!(angle_diff(7.1, 0.0), 7.1);
        assert_eq!(angle_diff(0.0, 7.1), -7.1);
        assert_eq!(angle_diff(180.0, 0.0), 180.0);
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert_relative_eq!(angle_diff(1.0, 359.0), 2.0, epsilon = 1e-9);
        assert_relative_eq!(angle_diff(359.0, 1.0), -2.0, epsilon = 1e-9);
        assert_relative_eq!(angle_diff(-0.001, 180.0), 179.999, epsilon = 1e-9);
        assert_relative_eq!(angle_diff(720.0 + 10.0, 0.0), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_angle_diff_half_turn_is_positive() {
        // Range is (-180, 180]: -180 maps to +180
        assert_eq!(angle_diff(0.0, 180.0), 180.0);
        assert_eq!(angle_diff(-90.0, 90.0), 180.0);
    }

    #[test]
    fn test_wrap_azimuth() {
        assert_relative_eq!(wrap_azimuth(-90.0), 270.0);
        assert_relative_eq!(wrap_azimuth(360.0), 0.0);
        assert_relative_eq!(wrap_azimuth(725.5), 5.5, epsilon = 1e-9);
        let tiny = wrap_azimuth(-1e-20);
        assert!((0.0..360.0).contains(&tiny));
    }

    #[test]
    fn test_angles_almost_equal() {
        assert!(angles_almost_equal(359.99999, 0.0, 1e-4));
        assert!(angles_almost_equal(-0.001, 359.999, 1e-6));
        assert!(!angles_almost_equal(10.0, 10.1, 0.05));
    }
}
