use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use ghogcore::Dataset;
use serde::Serialize;

/// Shape of the dataset after one step.
#[derive(Clone, Debug, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub samples: usize,
    pub traces: usize,
}

pub struct WorkflowResult {
    pub dataset: Dataset,
    pub steps: Vec<StepRecord>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, dataset: Dataset) -> anyhow::Result<WorkflowResult> {
        let mut current = dataset;
        let mut steps = Vec::with_capacity(self.config.steps.len());
        for (index, step) in self.config.steps.iter().enumerate() {
            let transform = step.to_transform();
            current = transform
                .apply(&current)
                .with_context(|| format!("executing step {} ({})", index + 1, transform.name()))?;
            steps.push(StepRecord {
                step: transform.name().to_string(),
                samples: current.sample_count(),
                traces: current.trace_count(),
            });
        }

        Ok(WorkflowResult {
            dataset: current,
            steps,
        })
    }
}
