use std::sync::Arc;

use ndarray::{Array2, Axis};
use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftDirection, FftPlanner};

/// Two-dimensional FFT over a `(rows, cols)` complex array.
///
/// Plans are built when the helper is created and dropped with it; nothing is
/// cached between helpers. The inverse transform is normalized by
/// `rows * cols`, so `inverse(forward(x)) == x` up to rounding.
pub struct FftHelper {
    shape: (usize, usize),
    direction: FftDirection,
    along_rows: Arc<dyn Fft<f64>>,
    along_cols: Arc<dyn Fft<f64>>,
}

impl FftHelper {
    pub fn new(shape: (usize, usize), direction: FftDirection) -> Self {
        let mut planner = FftPlanner::new();
        let along_rows = planner.plan_fft(shape.0, direction);
        let along_cols = planner.plan_fft(shape.1, direction);
        Self {
            shape,
            direction,
            along_rows,
            along_cols,
        }
    }

    pub fn forward(shape: (usize, usize)) -> Self {
        Self::new(shape, FftDirection::Forward)
    }

    pub fn inverse(shape: (usize, usize)) -> Self {
        Self::new(shape, FftDirection::Inverse)
    }

    /// Transforms `data` in place. Panics if the shape differs from the plan.
    pub fn process(&self, data: &mut Array2<Complex64>) {
        assert_eq!(data.dim(), self.shape, "FFT plan shape mismatch");
        let (rows, cols) = self.shape;
        if rows == 0 || cols == 0 {
            return;
        }

        transform_lanes(data, Axis(0), self.along_rows.as_ref());
        transform_lanes(data, Axis(1), self.along_cols.as_ref());

        if self.direction == FftDirection::Inverse {
            let scale = 1.0 / (rows * cols) as f64;
            data.mapv_inplace(|value| value * scale);
        }
    }
}

fn transform_lanes(data: &mut Array2<Complex64>, axis: Axis, fft: &dyn Fft<f64>) {
    let mut buffer = vec![Complex64::zero(); data.len_of(axis)];
    for mut lane in data.lanes_mut(axis) {
        for (slot, value) in buffer.iter_mut().zip(lane.iter()) {
            *slot = *value;
        }
        fft.process(&mut buffer);
        for (value, slot) in lane.iter_mut().zip(buffer.iter()) {
            *value = *slot;
        }
    }
}

/// Sample frequencies of an `n`-point DFT with sample spacing `spacing`,
/// in the unshifted order `[0, 1, ..., -2, -1] / (n * spacing)`.
pub fn fftfreq(n: usize, spacing: f64) -> Vec<f64> {
    let denominator = n as f64 * spacing;
    let positive = (n + 1) / 2;
    (0..n)
        .map(|i| {
            let index = if i < positive {
                i as f64
            } else {
                i as f64 - n as f64
            };
            index / denominator
        })
        .collect()
}

/// Moves the zero-frequency entry of a 1-D sequence to the centre.
pub fn fftshift_1d<T: Copy>(values: &[T]) -> Vec<T> {
    let n = values.len();
    roll_1d(values, n / 2)
}

/// Moves the zero-frequency entry to the centre along both axes.
pub fn fftshift<T: Copy + Zero>(data: &Array2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    roll(data, rows / 2, cols / 2)
}

/// Exact inverse of [`fftshift`], also for odd lengths.
pub fn ifftshift<T: Copy + Zero>(data: &Array2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    roll(data, rows - rows / 2, cols - cols / 2)
}

fn roll_1d<T: Copy>(values: &[T], shift: usize) -> Vec<T> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    (0..n).map(|i| values[(i + n - shift % n) % n]).collect()
}

fn roll<T: Copy + Zero>(data: &Array2<T>, row_shift: usize, col_shift: usize) -> Array2<T> {
    let (rows, cols) = data.dim();
    let mut out = Array2::zeros((rows, cols));
    for ((i, j), value) in data.indexed_iter() {
        out[[(i + row_shift) % rows, (j + col_shift) % cols]] = *value;
    }
    out
}
