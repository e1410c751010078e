use anyhow::Context;
use ghogcore::io::DecoderConfig;
use ghogcore::processing::{Filter, Gain, Mute, Nmo, Restack, Stolt};
use ghogcore::Transform;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generator::profile::GeneratorConfig;

/// One processing step, tagged by `step:` in the workflow file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepConfig {
    Filter(Filter),
    Gain(Gain),
    Mute(Mute),
    Nmo(Nmo),
    Restack(Restack),
    Stolt(Stolt),
}

impl StepConfig {
    pub fn to_transform(&self) -> Box<dyn Transform> {
        match self {
            Self::Filter(step) => Box::new(step.clone()),
            Self::Gain(step) => Box::new(step.clone()),
            Self::Mute(step) => Box::new(step.clone()),
            Self::Nmo(step) => Box::new(step.clone()),
            Self::Restack(step) => Box::new(step.clone()),
            Self::Stolt(step) => Box::new(step.clone()),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub decoder: DecoderConfig,
    pub steps: Vec<StepConfig>,
    /// Capture used by `--synthetic` runs.
    pub synthetic: GeneratorConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_steps(steps: Vec<StepConfig>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghogcore::io::TruncationPolicy;
    use ghogcore::processing::FilterAxis;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_load_reads_yaml_steps() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"decoder:\n  truncation: reject\nsteps:\n  - step: filter\n    low: 1.0e6\n    high: 5.0e6\n  - step: gain\n    tpow: 2\n  - step: restack\n    interval: 2.5\n  - step: stolt\n    taper: 16\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.decoder.truncation, TruncationPolicy::Reject);
        assert_eq!(cfg.steps.len(), 4);
        match &cfg.steps[0] {
            StepConfig::Filter(filter) => {
                assert_eq!(filter.high, Some(5.0e6));
                assert_eq!(filter.axis, FilterAxis::FastTime);
                assert_eq!(filter.order, 4);
            }
            other => panic!("expected a filter step, got {:?}", other),
        }
        match &cfg.steps[3] {
            StepConfig::Stolt(stolt) => {
                assert_eq!(stolt.taper, 16);
                assert_eq!(stolt.permittivity, 3.15);
            }
            other => panic!("expected a stolt step, got {:?}", other),
        }
        let names: Vec<&str> = cfg.steps.iter().map(|step| step.to_transform().name()).collect();
        assert_eq!(names, vec!["filter", "gain", "restack", "stolt"]);
    }

    #[test]
    fn unknown_step_is_rejected() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"steps:\n  - step: deconvolve\n").unwrap();
        let path = temp.into_temp_path();
        assert!(WorkflowConfig::load(&path).is_err());
    }

    #[test]
    fn mute_indices_must_be_integers() {
        let parsed: Result<WorkflowConfig, _> =
            serde_yaml::from_str("steps:\n  - step: mute\n    indices: [0, oops]\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: WorkflowConfig = serde_yaml::from_str("{}").unwrap();
        assert!(cfg.steps.is_empty());
        assert_eq!(cfg.synthetic.traces, 100);
        assert_eq!(cfg.decoder.truncation, TruncationPolicy::Recover);
    }
}
