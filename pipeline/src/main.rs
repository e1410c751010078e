use anyhow::Context;
use clap::Parser;
use generator::profile::build_capture_from_config;
use ghogcore::io::{self, TimedFix};
use ghogcore::Dataset;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use workflow::config::WorkflowConfig;
use workflow::runner::{Runner, StepRecord};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Groundhog GPR processing driver for one capture")]
struct Args {
    /// Raw capture to decode, or a container when --from-group is given
    input: Option<PathBuf>,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Container to write the processed group to
    #[arg(long)]
    output: Option<PathBuf>,
    /// Group name for the processed dataset
    #[arg(long, default_value = "proc")]
    group: String,
    /// Also store the unprocessed dataset under this group
    #[arg(long)]
    raw_group: Option<String>,
    /// Read the input dataset from this group of a container
    #[arg(long)]
    from_group: Option<String>,
    /// JSON position stream to align with the capture's trace times
    #[arg(long)]
    positions: Option<PathBuf>,
    /// Replace existing groups in the output container
    #[arg(long, default_value_t = false)]
    overwrite: bool,
    /// Process a generated capture instead of reading one
    #[arg(long, default_value_t = false)]
    synthetic: bool,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    source: String,
    samples: usize,
    traces: usize,
    steps: &'a [StepRecord],
}

fn read_positions(path: &Path) -> anyhow::Result<Vec<TimedFix>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading position stream {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing position stream {}", path.display()))
}

fn load_input(args: &Args, config: &WorkflowConfig) -> anyhow::Result<(Dataset, String)> {
    if args.synthetic {
        let synthetic = build_capture_from_config(&config.synthetic)?;
        let capture = io::decode(&synthetic.bytes, &config.decoder).context("decoding synthetic capture")?;
        let fixes = io::align_fixes(&capture.timestamps, &synthetic.positions)?;
        let dataset = capture.with_fixes(fixes)?.dataset;
        return Ok((dataset, "synthetic".into()));
    }

    let input = args
        .input
        .as_ref()
        .context("an input path is required unless --synthetic is given")?;
    if let Some(group) = &args.from_group {
        let dataset = io::load(input, group)
            .with_context(|| format!("loading group '{}' from {}", group, input.display()))?;
        return Ok((dataset, format!("{}:{}", input.display(), group)));
    }

    let mut capture = io::decode_file(input, &config.decoder)
        .with_context(|| format!("decoding capture {}", input.display()))?;
    if capture.truncated {
        info!(
            "{} was truncated; {} bytes of partial record discarded",
            input.display(),
            capture.discarded_bytes
        );
    }
    if let Some(path) = &args.positions {
        let stream = read_positions(path)?;
        let fixes = io::align_fixes(&capture.timestamps, &stream)?;
        capture = capture.with_fixes(fixes)?;
    }
    Ok((capture.dataset, input.display().to_string()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::default()
    };

    let (dataset, source) = load_input(&args, &workflow_config)?;
    let runner = Runner::new(workflow_config);
    let result = runner.execute(dataset.clone())?;

    if let Some(output) = &args.output {
        if let Some(raw_group) = &args.raw_group {
            io::save(output, raw_group, &dataset, args.overwrite)
                .with_context(|| format!("saving group '{}' to {}", raw_group, output.display()))?;
        }
        io::save(output, &args.group, &result.dataset, args.overwrite)
            .with_context(|| format!("saving group '{}' to {}", args.group, output.display()))?;
        info!("wrote group '{}' to {}", args.group, output.display());
    }

    let summary = RunSummary {
        source,
        samples: result.dataset.sample_count(),
        traces: result.dataset.trace_count(),
        steps: &result.steps,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
