use std::time::Instant;

use chrono::Duration;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Fix};
use crate::math::geodesy::step_distances;
use crate::math::stats::StatsHelper;
use crate::prelude::{parameter_error, GhogResult, Transform};
use crate::telemetry::log::LogManager;

/// Which step lengths the rejection test looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCheck {
    /// Steps after noise below the threshold has been zeroed.
    #[default]
    Thresholded,
    /// Steps exactly as measured.
    Raw,
}

/// Averages traces into fixed along-track distance bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Restack {
    /// Bin length in metres.
    pub interval: f64,
    /// Steps shorter than this are treated as standing still.
    pub noise_threshold: f64,
    pub step_check: StepCheck,
}

impl Default for Restack {
    fn default() -> Self {
        Self {
            interval: 5.0,
            noise_threshold: 0.0,
            step_check: StepCheck::Thresholded,
        }
    }
}

/// Bin assignment computed from a set of fixes.
#[derive(Debug, Clone, PartialEq)]
pub struct RestackPlan {
    /// Cumulative along-track distance of every trace, starting at 0.
    pub distances: Vec<f64>,
    /// Output bin of every trace.
    pub bins: Vec<usize>,
    /// Number of traces in each output bin.
    pub counts: Vec<usize>,
}

impl RestackPlan {
    pub fn bin_count(&self) -> usize {
        self.counts.len()
    }
}

impl Restack {
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_noise_threshold(mut self, noise_threshold: f64) -> Self {
        self.noise_threshold = noise_threshold;
        self
    }

    pub fn with_step_check(mut self, step_check: StepCheck) -> Self {
        self.step_check = step_check;
        self
    }

    fn check(&self) -> GhogResult<()> {
        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err(parameter_error(format!(
                "restack interval must be positive, got {}",
                self.interval
            )));
        }
        if !(self.noise_threshold >= 0.0) {
            return Err(parameter_error(format!(
                "noise threshold cannot be negative, got {}",
                self.noise_threshold
            )));
        }
        Ok(())
    }

    /// Along-track distances and bin assignment for `fixes`.
    pub fn plan(&self, fixes: &[Fix]) -> GhogResult<RestackPlan> {
        self.check()?;
        if fixes.is_empty() {
            return Err(parameter_error("cannot restack a dataset without traces"));
        }

        let raw = step_distances(fixes);
        let steps: Vec<f64> = raw
            .iter()
            .map(|step| if *step < self.noise_threshold { 0.0 } else { *step })
            .collect();

        let checked = match self.step_check {
            StepCheck::Thresholded => &steps,
            StepCheck::Raw => &raw,
        };
        if let Some(largest) = StatsHelper::max(checked) {
            if largest >= self.interval {
                return Err(parameter_error(format!(
                    "largest step {:.3} m is not shorter than the {} m interval",
                    largest, self.interval
                )));
            }
        }

        let mut distances = Vec::with_capacity(fixes.len());
        let mut total = 0.0;
        distances.push(total);
        for step in &steps {
            total += step;
            distances.push(total);
        }

        let bin_count = ((total / self.interval).ceil() as usize).max(1);
        let bins: Vec<usize> = distances
            .iter()
            .map(|distance| ((distance / self.interval).floor() as usize).min(bin_count - 1))
            .collect();
        let mut counts = vec![0; bin_count];
        for bin in &bins {
            counts[*bin] += 1;
        }

        Ok(RestackPlan {
            distances,
            bins,
            counts,
        })
    }
}

fn mean_fix(fixes: &[Fix]) -> GhogResult<Fix> {
    let first = fixes
        .first()
        .map(|fix| fix.utc)
        .ok_or_else(|| parameter_error("restack bin holds no traces"))?;
    let mut elapsed = Vec::with_capacity(fixes.len());
    for fix in fixes {
        let micros = (fix.utc - first)
            .num_microseconds()
            .ok_or_else(|| parameter_error("trace timestamps are too far apart to average"))?;
        elapsed.push(micros as f64);
    }
    let lon: Vec<f64> = fixes.iter().map(|fix| fix.lon).collect();
    let lat: Vec<f64> = fixes.iter().map(|fix| fix.lat).collect();
    let hgt: Vec<f64> = fixes.iter().map(|fix| fix.hgt).collect();

    Ok(Fix::new(
        StatsHelper::mean(&lon),
        StatsHelper::mean(&lat),
        StatsHelper::mean(&hgt),
        first + Duration::microseconds(StatsHelper::mean(&elapsed).round() as i64),
    ))
}

impl Transform for Restack {
    fn name(&self) -> &'static str {
        "restack"
    }

    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset> {
        dataset.validate()?;
        let started = Instant::now();
        let plan = self.plan(dataset.fixes())?;

        let rows = dataset.sample_count();
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); plan.bin_count()];
        for (trace, bin) in plan.bins.iter().enumerate() {
            members[*bin].push(trace);
        }

        let mut traces = Array2::zeros((rows, plan.bin_count()));
        let mut fixes = Vec::with_capacity(plan.bin_count());
        for (bin, indices) in members.iter().enumerate() {
            // Cumulative distances never decrease, so no bin is empty.
            let stacked = dataset.traces().select(Axis(1), indices);
            if let Some(mean) = stacked.mean_axis(Axis(1)) {
                traces.column_mut(bin).assign(&mean);
            }
            let bin_fixes: Vec<Fix> = indices.iter().map(|index| dataset.fixes()[*index]).collect();
            fixes.push(mean_fix(&bin_fixes)?);
        }

        let mut attrs = dataset.attrs().clone();
        attrs.insert("stack_interval", self.interval);

        LogManager::new().record_step(
            self.name(),
            dataset.traces().dim(),
            traces.dim(),
            started,
            &format!(
                "{:.2} m track into {} m bins",
                plan.distances.last().copied().unwrap_or_default(),
                self.interval
            ),
        );
        Ok(Dataset::new(traces, fixes, attrs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::{epoch, sample_dataset};
    use crate::prelude::GhogError;

    /// Dataset whose fixes climb straight up by `step` metres per trace.
    fn climbing_dataset(rows: usize, cols: usize, step: f64) -> Dataset {
        let (traces, _, attrs) = sample_dataset(rows, cols).into_parts();
        let fixes = (0..cols)
            .map(|j| Fix::new(0.0, 0.0, j as f64 * step, epoch() + Duration::milliseconds(j as i64)))
            .collect();
        Dataset::new(traces, fixes, attrs).unwrap()
    }

    #[test]
    fn hundred_traces_one_metre_apart_make_twenty_bins() {
        let dataset = climbing_dataset(4, 100, 1.0);
        let restacked = Restack::new(5.0).apply(&dataset).unwrap();
        assert_eq!(restacked.trace_count(), 20);
        assert_eq!(restacked.fixes().len(), 20);
        assert_eq!(restacked.attrs().get_f64("stack_interval").unwrap(), 5.0);

        // Bin 0 holds traces 0..5: value (i * 100 + j) averages to i * 100 + 2.
        assert_eq!(restacked.traces()[[1, 0]], 102.0);
        assert_eq!(restacked.fixes()[0].hgt, 2.0);
        assert_eq!(restacked.fixes()[0].utc, epoch() + Duration::milliseconds(2));
    }

    #[test]
    fn plan_counts_sum_to_trace_count() {
        let dataset = climbing_dataset(2, 37, 0.7);
        let plan = Restack::new(3.0).plan(dataset.fixes()).unwrap();
        assert_eq!(plan.counts.iter().sum::<usize>(), 37);
        assert_eq!(plan.distances[0], 0.0);
        assert_eq!(*plan.bins.last().unwrap(), plan.bin_count() - 1);
        assert!(plan.counts.iter().all(|count| *count > 0));
    }

    #[test]
    fn interval_longer_than_track_gives_single_mean_trace() {
        let dataset = climbing_dataset(3, 4, 1.0);
        let restacked = Restack::new(10.0).apply(&dataset).unwrap();
        assert_eq!(restacked.trace_count(), 1);
        let expected = dataset.traces().mean_axis(Axis(1)).unwrap();
        assert_eq!(restacked.traces().column(0), expected);
    }

    #[test]
    fn step_at_or_above_interval_is_rejected() {
        let dataset = climbing_dataset(2, 5, 5.0);
        let err = Restack::new(5.0).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
        let err = Restack::new(2.0).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
    }

    #[test]
    fn noise_threshold_zeroes_small_steps() {
        let dataset = climbing_dataset(2, 6, 0.5);
        let restack = Restack::new(0.4).with_noise_threshold(1.0);
        let restacked = restack.apply(&dataset).unwrap();
        assert_eq!(restacked.trace_count(), 1);

        let err = restack.with_step_check(StepCheck::Raw).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let dataset = climbing_dataset(2, 3, 1.0);
        assert!(matches!(
            Restack::new(0.0).apply(&dataset).unwrap_err(),
            GhogError::Parameter(_)
        ));
        assert!(matches!(
            Restack::new(5.0).with_noise_threshold(-1.0).apply(&dataset).unwrap_err(),
            GhogError::Parameter(_)
        ));
    }
}
