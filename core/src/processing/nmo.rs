use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::math::interp::{interp, Boundary};
use crate::prelude::{parameter_error, GhogResult, Transform, SPEED_OF_LIGHT};
use crate::processing::DEFAULT_PERMITTIVITY;
use crate::telemetry::log::LogManager;
use crate::validate::ValidationError;

/// Trigger-delay and normal move-out correction for a bistatic antenna pair.
///
/// The digitizer triggers on the direct wave, which reaches the receiver
/// `separation / c` after transmission. The traces are first delayed by that
/// amount (rounded up to whole samples) so time zero is transmission, the
/// pre-trigger samples are dropped, and then each sample is mapped from its
/// offset travel time onto the zero-offset axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nmo {
    /// Transmitter-receiver separation in metres.
    pub separation: f64,
    /// Relative permittivity setting the move-out velocity.
    pub permittivity: f64,
}

impl Default for Nmo {
    fn default() -> Self {
        Self {
            separation: 0.0,
            permittivity: DEFAULT_PERMITTIVITY,
        }
    }
}

impl Nmo {
    pub fn new(separation: f64, permittivity: f64) -> Self {
        Self {
            separation,
            permittivity,
        }
    }

    pub fn velocity(&self) -> f64 {
        SPEED_OF_LIGHT / self.permittivity.sqrt()
    }

    fn check(&self) -> GhogResult<()> {
        if !(self.permittivity >= 1.0) || !self.permittivity.is_finite() {
            return Err(parameter_error(format!(
                "move-out permittivity must be at least 1, got {}",
                self.permittivity
            )));
        }
        if !(self.separation >= 0.0) || !self.separation.is_finite() {
            return Err(parameter_error(format!(
                "antenna separation cannot be negative, got {}",
                self.separation
            )));
        }
        Ok(())
    }
}

impl Transform for Nmo {
    fn name(&self) -> &'static str {
        "nmo"
    }

    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset> {
        self.check()?;
        dataset.validate()?;
        let started = Instant::now();

        let attrs = dataset.attrs();
        let fs = attrs.fs()?;
        let pre_trig = attrs.pre_trig()? as usize;
        let spt = attrs.spt()?;
        let (rows, cols) = dataset.traces().dim();

        let delay = (self.separation / SPEED_OF_LIGHT * fs).ceil() as usize;
        let padded = rows + delay;
        if pre_trig > padded {
            return Err(ValidationError::InvalidAttribute {
                key: "pre_trig".into(),
                reason: format!("{} exceeds the {} delayed samples per trace", pre_trig, padded),
            }
            .into());
        }

        // Row r of the output comes from delayed row r + pre_trig, which is
        // input row r + pre_trig - delay when that lies inside the trace.
        let out_rows = padded - pre_trig;
        let source = dataset.traces();
        let delayed = Array2::from_shape_fn((out_rows, cols), |(r, c)| {
            let shifted = r + pre_trig;
            if shifted < delay {
                0.0
            } else {
                source[[shifted - delay, c]]
            }
        });

        let dt = 1.0 / fs;
        let velocity = self.velocity();
        let offset_time_sq = (self.separation / velocity).powi(2);
        let t0: Vec<f64> = (0..out_rows).map(|i| i as f64 * dt).collect();
        let t: Vec<f64> = t0.iter().map(|t0| (t0 * t0 + offset_time_sq).sqrt()).collect();

        let mut traces = Array2::zeros((out_rows, cols));
        for (mut out, column) in traces.columns_mut().into_iter().zip(delayed.columns()) {
            let resampled = interp(&t, &t0, &column.to_vec(), Boundary::Clamp);
            for (value, resampled) in out.iter_mut().zip(resampled) {
                *value = resampled;
            }
        }

        let mut attrs = attrs.clone();
        attrs.insert("spt", spt - pre_trig as i64 + delay as i64);
        attrs.insert("pre_trig", 0_i64);
        attrs.insert("nmo_separation", self.separation);
        attrs.insert("nmo_velocity", velocity);

        LogManager::new().record_step(
            self.name(),
            (rows, cols),
            traces.dim(),
            started,
            &format!("trigger delay {} samples, velocity {:.4e} m/s", delay, velocity),
        );
        Ok(Dataset::new(traces, dataset.fixes().to_vec(), attrs)?)
    }
}
