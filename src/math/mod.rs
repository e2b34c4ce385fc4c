pub mod polygon_2d;

/// 2D point type.
pub type Point2 = nalgebra::Point2<f64>;

/// 3D point type.
pub type Point3 = nalgebra::Point3<f64>;

/// Global geometric tolerance for floating-point comparisons.
pub const TOLERANCE: f64 = 1e-10;

/// Rounds `value` to `decimals` decimal places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let rounded = (value * scale).round() / scale;
    // Avoid rendering `-0.0` for values that round to zero.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Relative comparison used for unit factors parsed from text.
#[must_use]
pub fn nearly_equal(a: f64, b: f64, rel: f64) -> bool {
    let scale = a.abs().max(b.abs());
    (a - b).abs() <= rel * scale || (a - b).abs() < TOLERANCE
}

/// Maps a coordinate onto an integer lattice so it can be used as a hash key.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(value: f64) -> i64 {
    (value / 1e-9).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn round_to_six_decimals() {
        assert_relative_eq!(round_to(0.123_456_789, 6), 0.123_457);
        assert_relative_eq!(round_to(169.000_000_4, 6), 169.0);
        assert!(round_to(-1e-9, 6).is_sign_positive());
    }

    #[test]
    fn nearly_equal_accepts_decimal_unit_pairs() {
        assert!(nearly_equal(0.001, 1e-9 * 1e6, 1e-9));
        assert!(!nearly_equal(0.001, 1e-8 * 1e6, 1e-9));
    }

    #[test]
    fn quantize_merges_float_noise() {
        assert_eq!(quantize(0.1 + 0.2), quantize(0.3));
        assert_ne!(quantize(0.3), quantize(0.300_001));
    }
}
