use anyhow::Context;
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use generator::profile::GeneratorConfig;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod hal;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Offline driver for the lab acquisition post-processing core")]
struct Args {
    /// Run one synthetic acquisition cycle and emit a summary
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 16)]
    repetitions: usize,
    #[arg(long, default_value_t = 4)]
    segments: usize,
    #[arg(long, default_value_t = 1024)]
    samples: usize,
    #[arg(long, default_value_t = 2)]
    pushes: usize,
    /// Run the pipeline on the device backend
    #[arg(long, default_value_t = false)]
    gpu: bool,
    /// Print the pipeline configuration as JSON and exit
    #[arg(long, default_value_t = false)]
    dump_pipeline: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        let generator = GeneratorConfig {
            repetitions: args.repetitions,
            segments: args.segments,
            samples: args.samples,
            pushes: args.pushes,
            ..Default::default()
        };
        WorkflowConfig::from_args(args.gpu, generator)
    };

    if args.dump_pipeline {
        println!(
            "{}",
            serde_json::to_string_pretty(&workflow_config.pipeline)
                .context("serializing pipeline configuration")?
        );
        return Ok(());
    }

    if args.offline {
        let runner = Runner::new(workflow_config);
        let summary = runner.execute()?;

        println!(
            "Offline run -> pushes {}, packets processed {}, stage errors {}, axes {:?}",
            summary.packets_pushed, summary.packets_processed, summary.stage_errors, summary.axes
        );
        for (name, shape) in &summary.channels {
            println!("  channel {name}: shape {shape:?}");
        }

        let report = format!(
            "pushes={} processed={} errors={} axes={:?} channels={:?}\n",
            summary.packets_pushed,
            summary.packets_processed,
            summary.stage_errors,
            summary.axes,
            summary.channels
        );
        let report_path = PathBuf::from("tools/data/offline_collect.log");
        if let Some(parent) = report_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(report_path)?;
        file.write_all(report.as_bytes())?;
    }

    Ok(())
}
