use std::time::Instant;

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::dataset::{Attributes, Dataset};
use crate::math::iir::{butterworth, sosfiltfilt, BandType, Section};
use crate::prelude::{parameter_error, GhogResult, Transform};
use crate::telemetry::log::LogManager;

/// Samples of odd extension added at each end before filtering.
pub const FILTER_PADLEN: usize = 256;

/// Axis a [`Filter`] runs along.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAxis {
    /// Down each trace; edges in hertz.
    #[default]
    FastTime,
    /// Across traces; edges in cycles per metre once restacked, otherwise
    /// fractions of Nyquist.
    SlowTime,
}

impl FilterAxis {
    fn axis(self) -> Axis {
        match self {
            Self::FastTime => Axis(0),
            Self::SlowTime => Axis(1),
        }
    }
}

/// Zero-phase Butterworth filter.
///
/// Leaving `low` unset gives a low-pass at `high`, leaving `high` unset gives
/// a high-pass at `low`; with both set the filter is a band-pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub axis: FilterAxis,
    pub order: usize,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            low: None,
            high: None,
            axis: FilterAxis::FastTime,
            order: 4,
        }
    }
}

impl Filter {
    pub fn bandpass(low: f64, high: f64) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
            ..Default::default()
        }
    }

    pub fn lowpass(high: f64) -> Self {
        Self {
            high: Some(high),
            ..Default::default()
        }
    }

    pub fn highpass(low: f64) -> Self {
        Self {
            low: Some(low),
            ..Default::default()
        }
    }

    pub fn along(mut self, axis: FilterAxis) -> Self {
        self.axis = axis;
        self
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Sampling rate the edges are expressed against, or `None` for
    /// fractions of Nyquist.
    fn sampling_rate(&self, attrs: &Attributes) -> GhogResult<Option<f64>> {
        match self.axis {
            FilterAxis::FastTime => Ok(Some(attrs.fs()?)),
            FilterAxis::SlowTime => Ok(attrs
                .optional_f64("stack_interval")
                .filter(|spacing| spacing.is_finite() && *spacing > 0.0)
                .map(|spacing| 1.0 / spacing)),
        }
    }

    fn design(&self, attrs: &Attributes) -> GhogResult<Vec<Section>> {
        if self.order == 0 {
            return Err(parameter_error("filter order must be positive"));
        }
        let rate = self.sampling_rate(attrs)?;
        let normalize = |edge: f64| -> GhogResult<f64> {
            if !edge.is_finite() || edge <= 0.0 {
                return Err(parameter_error(format!("filter edge {} must be positive", edge)));
            }
            let normalized = match rate {
                Some(rate) => 2.0 * edge / rate,
                None => edge,
            };
            if normalized >= 1.0 {
                return Err(parameter_error(format!(
                    "filter edge {} is at or above the Nyquist frequency",
                    edge
                )));
            }
            Ok(normalized)
        };

        let band = match (self.low, self.high) {
            (None, None) => return Err(parameter_error("both filter edges cannot be unset")),
            (Some(low), None) => BandType::Highpass(normalize(low)?),
            (None, Some(high)) => BandType::Lowpass(normalize(high)?),
            (Some(low), Some(high)) => {
                if low >= high {
                    return Err(parameter_error(format!(
                        "filter low edge {} must be below high edge {}",
                        low, high
                    )));
                }
                BandType::Bandpass(normalize(low)?, normalize(high)?)
            }
        };
        Ok(butterworth(self.order, band))
    }
}

impl Transform for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset> {
        dataset.validate()?;
        let started = Instant::now();
        let sections = self.design(dataset.attrs())?;

        let mut traces = dataset.traces().clone();
        for mut lane in traces.lanes_mut(self.axis.axis()) {
            let filtered = sosfiltfilt(&sections, &lane.to_vec(), FILTER_PADLEN);
            for (value, filtered) in lane.iter_mut().zip(filtered) {
                *value = filtered;
            }
        }

        LogManager::new().record_step(
            self.name(),
            dataset.traces().dim(),
            traces.dim(),
            started,
            &format!(
                "order {} edges {:?}..{:?} along {:?}",
                self.order, self.low, self.high, self.axis
            ),
        );
        Ok(dataset.with_traces(traces)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::prelude::GhogError;
    use ndarray::Array2;

    fn impulse_dataset(rows: usize, at: usize) -> Dataset {
        let mut traces = Array2::zeros((rows, 2));
        traces[[at, 0]] = 1.0;
        traces[[at, 1]] = -2.0;
        sample_dataset(rows, 2).with_traces(traces).unwrap()
    }

    fn peak_index(values: &[f64]) -> usize {
        values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(index, _)| index)
            .unwrap()
    }

    #[test]
    fn bandpass_keeps_impulse_peak_in_place() {
        let dataset = impulse_dataset(512, 256);
        let filtered = Filter::bandpass(1e6, 5e6).apply(&dataset).unwrap();
        for column in filtered.traces().columns() {
            let peak = peak_index(&column.to_vec());
            assert!((peak as isize - 256).abs() <= 1, "peak moved to {}", peak);
        }
        assert_eq!(filtered.fixes(), dataset.fixes());
        assert_eq!(filtered.attrs(), dataset.attrs());
    }

    #[test]
    fn lowpass_leaves_constant_traces_unchanged() {
        let dataset = sample_dataset(300, 3).with_traces(Array2::from_elem((300, 3), 7.0)).unwrap();
        let filtered = Filter::lowpass(2e6).apply(&dataset).unwrap();
        assert!(filtered.traces().iter().all(|v| (v - 7.0).abs() < 1e-8));
    }

    #[test]
    fn filter_rejects_missing_edges_and_zero_order() {
        let dataset = sample_dataset(64, 2);
        let err = Filter::default().apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
        let err = Filter::lowpass(1e6).with_order(0).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
        let err = Filter::bandpass(5e6, 1e6).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
        let err = Filter::lowpass(20e6).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
    }

    #[test]
    fn slow_time_edges_use_trace_spacing_when_restacked() {
        let (traces, fixes, mut attrs) = sample_dataset(4, 64).into_parts();
        attrs.insert("stack_interval", 5.0);
        let dataset = Dataset::new(traces, fixes, attrs).unwrap();
        // Nyquist for 5 m spacing is 0.1 cycles/m.
        let err = Filter::lowpass(0.1).along(FilterAxis::SlowTime).apply(&dataset).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
        let filtered = Filter::lowpass(0.05).along(FilterAxis::SlowTime).apply(&dataset).unwrap();
        assert_eq!(filtered.traces().dim(), (4, 64));
    }

    #[test]
    fn slow_time_without_spacing_uses_fraction_of_nyquist() {
        let dataset = sample_dataset(4, 64);
        let filtered = Filter::highpass(0.2).along(FilterAxis::SlowTime).apply(&dataset).unwrap();
        assert!(filtered.traces().iter().all(|v| v.is_finite()));
    }
}
