use ndarray::{Array2, Axis};

pub struct MatrixHelper;

impl MatrixHelper {
    /// Same-size convolution with a `width x width` averaging kernel,
    /// treating everything outside the array as zero.
    pub fn box_smooth(input: &Array2<f64>, width: usize) -> Array2<f64> {
        if width <= 1 {
            return input.clone();
        }
        let mut out = input.clone();
        for axis in [Axis(0), Axis(1)] {
            for mut lane in out.lanes_mut(axis) {
                let smoothed = box_same(&lane.to_vec(), width);
                for (value, smoothed) in lane.iter_mut().zip(smoothed) {
                    *value = smoothed;
                }
            }
        }
        out
    }

    /// Ones with `width / 2` leading and `ceil(width / 2)` trailing rows and
    /// columns zeroed, smoothed by [`MatrixHelper::box_smooth`].
    pub fn edge_taper(shape: (usize, usize), width: usize) -> Array2<f64> {
        let (rows, cols) = shape;
        if width == 0 {
            return Array2::ones(shape);
        }
        let lead = width / 2;
        let trail = width - width / 2;
        let inside = |index: usize, len: usize| index >= lead && index < len.saturating_sub(trail);
        let mask = Array2::from_shape_fn(shape, |(i, j)| {
            if inside(i, rows) && inside(j, cols) {
                1.0
            } else {
                0.0
            }
        });
        Self::box_smooth(&mask, width)
    }
}

/// One-dimensional "same" box convolution of odd or even width.
fn box_same(values: &[f64], width: usize) -> Vec<f64> {
    let n = values.len() as isize;
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for value in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + value);
    }

    let reach_back = (width / 2) as isize;
    let reach_forward = width as isize - 1 - reach_back;
    let scale = 1.0 / width as f64;
    (0..n)
        .map(|i| {
            let lo = (i - reach_back).max(0);
            let hi = (i + reach_forward).min(n - 1);
            (prefix[(hi + 1) as usize] - prefix[lo as usize]) * scale
        })
        .collect()
}
