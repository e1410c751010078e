pub mod fft;
pub mod geodesy;
pub mod iir;
pub mod interp;
pub mod matrix;
pub mod stats;

pub use fft::FftHelper;
pub use interp::{interp, Boundary};
pub use matrix::MatrixHelper;
pub use stats::StatsHelper;
