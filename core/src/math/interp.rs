use std::ops::{Add, Mul};

/// What to return for a query point outside the sample range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Value of the nearest end sample.
    Clamp,
    /// Zero. Points within a rounding tolerance of an end still take its value.
    Zero,
}

/// Relative span tolerance under which a point counts as lying on an end sample.
const END_TOLERANCE: f64 = 1e-12;

/// Piecewise-linear interpolation of `(xp, fp)` at every point of `x`.
///
/// `xp` must be increasing. `x` may be in any order.
pub fn interp<T>(x: &[f64], xp: &[f64], fp: &[T], boundary: Boundary) -> Vec<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f64, Output = T>,
{
    debug_assert_eq!(xp.len(), fp.len());
    let n = xp.len().min(fp.len());
    if n == 0 {
        return vec![T::default(); x.len()];
    }

    let first = xp[0];
    let last = xp[n - 1];
    let tolerance = (last - first).abs() * END_TOLERANCE;

    x.iter()
        .map(|&point| {
            if point.is_nan() {
                return T::default();
            }
            if point <= first {
                return match boundary {
                    Boundary::Clamp => fp[0],
                    Boundary::Zero if first - point <= tolerance => fp[0],
                    Boundary::Zero => T::default(),
                };
            }
            if point >= last {
                return match boundary {
                    Boundary::Clamp => fp[n - 1],
                    Boundary::Zero if point - last <= tolerance => fp[n - 1],
                    Boundary::Zero => T::default(),
                };
            }

            let upper = xp[..n].partition_point(|&sample| sample <= point);
            let lower = upper - 1;
            let width = xp[upper] - xp[lower];
            let weight = (point - xp[lower]) / width;
            fp[lower] * (1.0 - weight) + fp[upper] * weight
        })
        .collect()
}
