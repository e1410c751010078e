use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::prelude::{parameter_error, GhogResult, Transform};
use crate::telemetry::log::LogManager;

/// What the indices of a [`Mute`] refer to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteAxis {
    /// Whole trace columns.
    #[default]
    Traces,
    /// Sample rows across every trace.
    Samples,
}

/// Hard zeroing of selected traces or sample rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mute {
    pub indices: Vec<usize>,
    pub axis: MuteAxis,
}

impl Mute {
    pub fn traces(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            indices: indices.into_iter().collect(),
            axis: MuteAxis::Traces,
        }
    }

    pub fn samples(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            indices: indices.into_iter().collect(),
            axis: MuteAxis::Samples,
        }
    }
}

impl Transform for Mute {
    fn name(&self) -> &'static str {
        "mute"
    }

    fn apply(&self, dataset: &Dataset) -> GhogResult<Dataset> {
        dataset.validate()?;
        let started = Instant::now();
        let limit = match self.axis {
            MuteAxis::Traces => dataset.trace_count(),
            MuteAxis::Samples => dataset.sample_count(),
        };
        if let Some(index) = self.indices.iter().find(|&&index| index >= limit) {
            return Err(parameter_error(format!(
                "mute index {} out of range for {} {:?}",
                index, limit, self.axis
            )));
        }

        let mut traces = dataset.traces().clone();
        for &index in &self.indices {
            match self.axis {
                MuteAxis::Traces => traces.column_mut(index).fill(0.0),
                MuteAxis::Samples => traces.row_mut(index).fill(0.0),
            }
        }

        LogManager::new().record_step(
            self.name(),
            dataset.traces().dim(),
            traces.dim(),
            started,
            &format!("{} {:?} muted", self.indices.len(), self.axis),
        );
        Ok(dataset.with_traces(traces)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::prelude::GhogError;

    #[test]
    fn mute_zeroes_selected_traces_only() {
        let dataset = sample_dataset(4, 5);
        let muted = Mute::traces([1, 3]).apply(&dataset).unwrap();
        assert!(muted.traces().column(1).iter().all(|v| *v == 0.0));
        assert!(muted.traces().column(3).iter().all(|v| *v == 0.0));
        assert_eq!(muted.traces().column(2), dataset.traces().column(2));
        assert_eq!(dataset.traces()[[1, 1]], 6.0);
    }

    #[test]
    fn mute_zeroes_selected_sample_rows() {
        let dataset = sample_dataset(4, 5);
        let muted = Mute::samples([0]).apply(&dataset).unwrap();
        assert!(muted.traces().row(0).iter().all(|v| *v == 0.0));
        assert_eq!(muted.traces().row(1), dataset.traces().row(1));
    }

    #[test]
    fn mute_rejects_out_of_range_index() {
        let err = Mute::samples([4]).apply(&sample_dataset(4, 5)).unwrap_err();
        assert!(matches!(err, GhogError::Parameter(_)));
    }

    #[test]
    fn mute_indices_must_deserialize_as_integer_list() {
        assert!(serde_json::from_str::<Mute>(r#"{"indices": [0, 2], "axis": "samples"}"#).is_ok());
        assert!(serde_json::from_str::<Mute>(r#"{"indices": "0:2"}"#).is_err());
    }
}
