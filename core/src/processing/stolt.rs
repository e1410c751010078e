//! Frequency-wavenumber (Stolt) migration.
//!
//! The padded section is transformed to `(ω, kx)`, every wavenumber column is
//! remapped from temporal frequency onto vertical wavenumber along the
//! dispersion relation `ω = sign(kz) · v/2 · sqrt(kx² + kz²)`, scaled by the
//! obliquity factor and transformed back.

use std::time::Instant;

use ndarray::{s, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::math::fft::{fftfreq, fftshift, fftshift_1d, ifftshift, FftHelper};
use crate::math::interp::{interp, Boundary};
use crate::math::matrix::MatrixHelper;
use crate::prelude::{parameter_error, GhogResult, Transform, SPEED_OF_LIGHT};
use crate::processing::DEFAULT_PERMITTIVITY;
use crate::telemetry::log::LogManager;
use crate::validate::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stolt {
    /// Relative permittivity setting the migration velocity.
    pub permittivity: f64,
    /// Edge taper width in samples and traces; 0 disables the taper.
    pub taper: usize,
    /// Zero rows appended below the section, 10 times the row count when unset.
    pub time_pad: Option<usize>,
    /// Zero columns appended after the section, the column count when unset.
    pub trace_pad: Option<usize>,
    /// Trace spacing in metres, overriding the `stack_interval` attribute.
    pub trace_spacing: Option<f64>,
}

impl Default for Stolt {
    fn default() -> Self {
        Self {
            permittivity: DEFAULT_PERMITTIVITY,
            taper: 32,
            time_pad: None,
            trace_pad: None,
            trace_spacing: None,
        }
    }
}

/// `|kz| / |k|`, defined as 0 at the origin.
pub fn obliquity(kx: f64, kz: f64) -> f64 {
    let k = kx.hypot(kz);
    if k == 0.0 {
        0.0
    } else {
        kz.abs() / k
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Stolt {
    pub fn new(permittivity: f64) -> Self {
        Self {
            permittivity,
            ..Default::default()
        }
    }

    pub fn with_taper(mut self, taper: usize) -> Self {
        self.taper = taper;
        self
    }

    pub fn with_padding(mut self, time_pad: usize, trace_pad: usize) -> Self {
        self.time_pad = Some(time_pad);
        self.trace_pad = Some(trace_pad);
        self
    }

    pub fn with_trace_spacing(mut self, spacing: f64) -> Self {
        self.trace_spacing = Some(spacing);
        self
    }

    pub fn velocity(&self) -> f64 {
        SPEED_OF_LIGHT / self.permittivity.sqrt()
    }

    fn trace_spacing(&self, dataset: &Dataset) -> GhogResult<f64> {
        let spacing = self
            .trace_spacing
            .or_else(|| dataset.attrs().optional_f64("stack_interval"))
            .ok_or_else(|| ValidationError::MissingAttribute("stack_interval".into()))?;
        if !spacing.is_finite() || spacing <= 0.0 {
            return Err(parameter_error(format!("trace spacing must be positive, got {}", spacing)));
        }
        Ok(spacing)
    }

    fn migrate(&self, traces: &Array2<f64>, dt: f64, dx: f64) -> Array2<f64> {
        let (rows, cols) = traces.dim();
        let padded_rows = rows + self.time_pad.unwrap_or(10 * rows);
        let padded_cols = cols + self.trace_pad.unwrap_or(cols);
        let shape = (padded_rows, padded_cols);

        let taper = MatrixHelper::edge_taper((rows, cols), self.taper);
        let mut spectrum = Array2::<Complex64>::zeros(shape);
        spectrum
            .slice_mut(s![..rows, ..cols])
            .assign(&(traces * &taper).mapv(|value| Complex64::new(value, 0.0)));
        FftHelper::forward(shape).process(&mut spectrum);
        let spectrum = fftshift(&spectrum);

        let velocity = self.velocity();
        let dz = velocity * dt / 2.0;
        let omega = fftshift_1d(&fftfreq(padded_rows, dt));
        let kx = fftshift_1d(&fftfreq(padded_cols, dx));
        let kz = fftshift_1d(&fftfreq(padded_rows, dz));

        let mut migrated = Array2::<Complex64>::zeros(shape);
        for (i, kx) in kx.iter().enumerate() {
            let mapped: Vec<f64> = kz
                .iter()
                .map(|kz| sign(*kz) * velocity / 2.0 * kx.hypot(*kz))
                .collect();
            let column = spectrum.column(i).to_vec();
            let remapped = interp(&mapped, &omega, &column, Boundary::Zero);
            for ((value, remapped), kz) in migrated.column_mut(i).iter_mut().zip(remapped).zip(&kz) {
                *value = remapped * obliquity(*kx, *kz);
            }
        }

        let mut migrated = ifftshift(&migrated);
        FftHelper::inverse(shape).process(&mut migrated);
        migrated.slice(s![..rows, ..cols]).mapv(|value| value.re)
    }
}

impl Transform for Stolt {
    fn name(&self) -> &'static str {
        "stolt"
    }

    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset> {
        if !(self.permittivity >= 1.0) || !self.permittivity.is_finite() {
            return Err(parameter_error(format!(
                "migration permittivity must be at least 1, got {}",
                self.permittivity
            )));
        }
        dataset.validate()?;
        let started = Instant::now();
        let dx = self.trace_spacing(dataset)?;
        let dt = 1.0 / dataset.attrs().fs()?;

        let traces = if dataset.sample_count() == 0 || dataset.trace_count() == 0 {
            dataset.traces().clone()
        } else {
            self.migrate(dataset.traces(), dt, dx)
        };

        let mut attrs = dataset.attrs().clone();
        attrs.insert("vmig", self.velocity());

        LogManager::new().record_step(
            self.name(),
            dataset.traces().dim(),
            traces.dim(),
            started,
            &format!("v {:.4e} m/s, dx {} m, taper {}", self.velocity(), dx, self.taper),
        );
        Ok(Dataset::new(traces, dataset.fixes().to_vec(), attrs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::prelude::GhogError;

    fn spaced(dataset: Dataset, spacing: f64) -> Dataset {
        let (traces, fixes, mut attrs) = dataset.into_parts();
        attrs.insert("stack_interval", spacing);
        Dataset::new(traces, fixes, attrs).unwrap()
    }

    #[test]
    fn zero_section_stays_zero() {
        let dataset = spaced(sample_dataset(16, 8), 5.0);
        let dataset = dataset.with_traces(Array2::zeros((16, 8))).unwrap();
        let migrated = Stolt::default().apply(&dataset).unwrap();
        assert_eq!(migrated.traces().dim(), (16, 8));
        assert!(migrated.traces().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn obliquity_vanishes_at_origin() {
        assert_eq!(obliquity(0.0, 0.0), 0.0);
        assert_eq!(obliquity(0.0, -2.0), 1.0);
        assert!((obliquity(3.0, 4.0) - 0.8).abs() < 1e-12);
        assert_eq!(sign(0.0), 0.0);
    }

    #[test]
    fn flat_reflector_loses_only_its_mean() {
        let (rows, cols) = (63, 8);
        let pulse: Vec<f64> = (0..rows)
            .map(|i| {
                let t = i as f64 - 20.0;
                (-t * t / 8.0).exp() + 0.3 * (i as f64 * 0.4).sin()
            })
            .collect();
        let traces = Array2::from_shape_fn((rows, cols), |(i, _)| pulse[i]);
        let dataset = spaced(sample_dataset(rows, cols), 5.0).with_traces(traces.clone()).unwrap();

        let migrated = Stolt::default().with_taper(0).with_padding(0, 0).apply(&dataset).unwrap();
        let mean = traces.mean().unwrap();
        for (out, input) in migrated.traces().iter().zip(traces.iter()) {
            assert!((out - (input - mean)).abs() < 1e-8, "{} vs {}", out, input - mean);
        }
    }

    #[test]
    fn migration_is_deterministic_and_records_velocity() {
        let dataset = spaced(sample_dataset(24, 6), 2.5);
        let first = Stolt::default().with_taper(4).apply(&dataset).unwrap();
        let second = Stolt::default().with_taper(4).apply(&dataset).unwrap();
        assert_eq!(first, second);
        let vmig = first.attrs().get_f64("vmig").unwrap();
        assert!((vmig - SPEED_OF_LIGHT / 3.15_f64.sqrt()).abs() < 1e-6);
        assert_eq!(first.fixes(), dataset.fixes());
    }

    #[test]
    fn trace_spacing_is_required() {
        let dataset = sample_dataset(16, 4);
        let err = Stolt::default().apply(&dataset).unwrap_err();
        assert!(matches!(
            err,
            GhogError::Validation(ValidationError::MissingAttribute(ref key)) if key == "stack_interval"
        ));
        let migrated = Stolt::default().with_trace_spacing(5.0).apply(&dataset).unwrap();
        assert_eq!(migrated.traces().dim(), (16, 4));
    }

    #[test]
    fn sub_unit_permittivity_is_rejected() {
        let dataset = spaced(sample_dataset(8, 4), 5.0);
        let err = Stolt::new(0.5).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
    }
}
