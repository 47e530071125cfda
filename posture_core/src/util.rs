//! Common numeric helpers for posture_core.

/// Round half away from zero to `decimals` places. Ticks must be bit-exact
/// across transports, so all outward rounding goes through this one helper.
#[inline]
pub fn round_half_away(value: f32, decimals: u32) -> f32 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10f64.powi(decimals as i32);
    let scaled = f64::from(value) * scale;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };
    (rounded / scale) as f32
}

/// Clamp a frame delta in seconds to the window the smoothers tolerate.
#[inline]
pub fn clamp_delta_seconds(delta: f64) -> f32 {
    delta.clamp(1e-3, 0.5) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        // Midpoints chosen to be exactly representable in f32.
        assert_eq!(round_half_away(72.25, 1), 72.3);
        assert_eq!(round_half_away(-72.25, 1), -72.3);
        assert_eq!(round_half_away(0.0625, 3), 0.063);
        assert_eq!(round_half_away(-0.0625, 3), -0.063);
    }

    #[test]
    fn delta_is_clamped_to_half_second() {
        assert_eq!(clamp_delta_seconds(10.0), 0.5);
        assert_eq!(clamp_delta_seconds(0.0), 1e-3);
        assert_eq!(clamp_delta_seconds(0.1), 0.1);
    }
}
