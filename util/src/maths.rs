//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::{Float, FloatConst};

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Piecewise-linear interpolation of `ys` over the breakpoints `xs`.
///
/// Values outside the breakpoint domain are clamped to the first or last
/// entry, the table is never extrapolated. `xs` must be strictly increasing
/// and the same length as `ys`, see [`is_strictly_increasing`].
///
/// Returns `None` if the table is empty or the lengths differ.
pub fn interp_clamped<T>(value: T, xs: &[T], ys: &[T]) -> Option<T>
where
    T: Float
{
    if xs.is_empty() || xs.len() != ys.len() {
        return None;
    }

    let last = xs.len() - 1;

    if value <= xs[0] {
        return Some(ys[0]);
    }
    if value >= xs[last] {
        return Some(ys[last]);
    }

    // Binary search for the bracketing segment
    let idx = match xs.binary_search_by(|x| x.partial_cmp(&value).unwrap_or(std::cmp::Ordering::Less)) {
        Ok(i) => return Some(ys[i]),
        Err(i) => i,
    };

    Some(lin_map((xs[idx - 1], xs[idx]), (ys[idx - 1], ys[idx]), value))
}

/// Returns true if every element is strictly greater than the previous one.
pub fn is_strictly_increasing<T>(values: &[T]) -> bool
where
    T: Float
{
    values.windows(2).all(|w| w[1] > w[0])
}

/// Clamp a value into `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    value.max(min).min(max)
}

/// Wrap an angle into the range `[-pi, pi)`.
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float + FloatConst
{
    rem_euclid(angle + T::PI(), T::TAU()) - T::PI()
}

/// Remove the 2pi jumps from a sequence of angles so that consecutive values
/// differ by less than pi.
pub fn unwrap_angles<T>(angles: &mut [T])
where
    T: Float + FloatConst
{
    for i in 1..angles.len() {
        let diff = wrap_to_pi(angles[i] - angles[i - 1]);
        angles[i] = angles[i - 1] + diff;
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()`, violating the mathematical definition, if
/// `self` is much smaller than `rhs.abs()` in magnitude and `self < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_interp_clamped() {
        let xs = [0.0, 10.0, 20.0];
        let ys = [5.0, 4.0, 2.0];

        assert_eq!(interp_clamped(-1.0, &xs, &ys), Some(5.0));
        assert_eq!(interp_clamped(25.0, &xs, &ys), Some(2.0));
        assert_eq!(interp_clamped(10.0, &xs, &ys), Some(4.0));
        assert!((interp_clamped(15.0, &xs, &ys).unwrap() - 3.0).abs() < 1e-12);
        assert_eq!(interp_clamped(1.0, &xs, &ys[..2]), None);
        assert_eq!(interp_clamped::<f64>(1.0, &[], &[]), None);
    }

    #[test]
    fn test_wrap_to_pi() {
        assert!((wrap_to_pi(3.0 * PI) - (-PI)).abs() < 1e-12);
        assert!((wrap_to_pi(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_to_pi(-0.5 - 2.0 * PI) - (-0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_unwrap_angles() {
        let mut a = [3.0, -3.0, -2.5];
        unwrap_angles(&mut a);
        assert!((a[1] - (2.0 * PI - 3.0)).abs() < 1e-12);
        assert!(a.windows(2).all(|w| (w[1] - w[0]).abs() < PI));
    }

    #[test]
    fn test_strictly_increasing() {
        assert!(is_strictly_increasing(&[0.0, 1.0, 2.0]));
        assert!(!is_strictly_increasing(&[0.0, 1.0, 1.0]));
    }
}
