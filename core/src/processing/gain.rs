use std::time::Instant;

use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::math::stats::StatsHelper;
use crate::prelude::{parameter_error, GhogResult, Transform};
use crate::telemetry::log::LogManager;

/// Power-of-time gain, normalized so the largest weight is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gain {
    pub tpow: f64,
}

impl Default for Gain {
    fn default() -> Self {
        Self { tpow: 1.0 }
    }
}

impl Gain {
    pub fn new(tpow: f64) -> Self {
        Self { tpow }
    }

    /// Weight for each sample row, measured from the trigger.
    pub fn weights(&self, rows: usize, pre_trig: i64, fs: f64) -> GhogResult<Vec<f64>> {
        if !self.tpow.is_finite() || self.tpow < 0.0 {
            return Err(parameter_error(format!(
                "gain power must be finite and non-negative, got {}",
                self.tpow
            )));
        }
        let integral = self.tpow.fract() == 0.0;
        let mut weights: Vec<f64> = (0..rows)
            .map(|i| {
                let t = (i as f64 - pre_trig as f64) / fs;
                if integral {
                    t.powi(self.tpow as i32)
                } else if t < 0.0 {
                    0.0
                } else {
                    t.powf(self.tpow)
                }
            })
            .collect();

        let peak = StatsHelper::max(&weights).unwrap_or(0.0);
        if !(peak > 0.0 && peak.is_finite()) {
            return Err(parameter_error(format!(
                "gain power {} gives no positive weight over {} samples",
                self.tpow, rows
            )));
        }
        for weight in weights.iter_mut() {
            *weight /= peak;
        }
        Ok(weights)
    }
}

impl Transform for Gain {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset> {
        dataset.validate()?;
        let started = Instant::now();
        let attrs = dataset.attrs();
        let weights = self.weights(dataset.sample_count(), attrs.pre_trig()?, attrs.fs()?)?;

        let column = Array1::from(weights).insert_axis(Axis(1));
        let traces = dataset.traces() * &column;

        LogManager::new().record_step(
            self.name(),
            dataset.traces().dim(),
            traces.dim(),
            started,
            &format!("tpow {}", self.tpow),
        );
        Ok(dataset.with_traces(traces)?)
    }
}
