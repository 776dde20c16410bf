use anyhow::Context;
use daqcore::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::generator::profile::GeneratorConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    pub pipeline: PipelineConfig,
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

    /// Default offline workflow: per-push sample mean, final repetition mean.
    pub fn from_args(gpu: bool, generator: GeneratorConfig) -> Self {
        let processor = if gpu { "ProcessorGPU" } else { "ProcessorCPU" };
        Self {
            generator,
            pipeline: PipelineConfig {
                name: "offline".to_string(),
                processor: processor.to_string(),
                main_stages: vec![json!({"type": "Mean", "axis": "sample"})],
                final_stages: vec![json!({"type": "Mean", "axis": "repetition"})],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_selects_the_backend_tag() {
        let cfg = WorkflowConfig::from_args(true, GeneratorConfig::default());
        assert_eq!(cfg.pipeline.processor, "ProcessorGPU");
        assert_eq!(cfg.pipeline.main_stages.len(), 1);
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"generator:\n  repetitions: 8\n  segments: 2\n  samples: 64\n  pushes: 2\npipeline:\n  name: readout\n  type: ProcessorCPU\n  main_stages:\n    - type: Mean\n      axis: sample\n  final_stages:\n    - type: Mean\n      axis: repetition\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.generator.repetitions, 8);
        assert_eq!(cfg.pipeline.name, "readout");
        assert_eq!(cfg.pipeline.main_stages[0]["type"], "Mean");
    }
}
