use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::pipeline::{DeviceProcessor, HostProcessor, Processor};
use crate::prelude::{Stage, StageError, StageResult};
use crate::processing::arithmetic::{ChannelArithmeticStage, ConstantArithmeticStage};
use crate::processing::channels::{
    AmplitudePhaseStage, ClusterStage, DuplicateStage, RenameStage, SliceStage,
};
use crate::processing::frequency::{DdcStage, FirFilterStage, MatchedFilterStage};
use crate::processing::reduce::{ReduceStage, Reduction};

pub type StageFactory = fn(Value) -> StageResult<Box<dyn Stage>>;

/// Explicit stage factory table.
///
/// Deserialization fails closed: a `type` tag with no registered factory is
/// a fatal configuration error at load time, not at first use.
pub struct StageRegistry {
    factories: BTreeMap<String, StageFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in stage type.
    pub fn with_builtin_stages() -> Self {
        let mut registry = Self::new();
        registry.register("Mean", |p| {
            Ok(Box::new(ReduceStage::from_params(Reduction::Mean, p)?))
        });
        registry.register("Integrate", |p| {
            Ok(Box::new(ReduceStage::from_params(Reduction::Integrate, p)?))
        });
        registry.register("Max", |p| {
            Ok(Box::new(ReduceStage::from_params(Reduction::Max, p)?))
        });
        registry.register("Ddc", |p| Ok(Box::new(DdcStage::from_params(p)?)));
        registry.register("FirFilter", |p| Ok(Box::new(FirFilterStage::from_params(p)?)));
        registry.register("MatchedFilter", |p| {
            Ok(Box::new(MatchedFilterStage::from_params(p)?))
        });
        registry.register("ConstantArithmetic", |p| {
            Ok(Box::new(ConstantArithmeticStage::from_params(p)?))
        });
        registry.register("ChannelArithmetic", |p| {
            Ok(Box::new(ChannelArithmeticStage::from_params(p)?))
        });
        registry.register("Duplicate", |p| Ok(Box::new(DuplicateStage::from_params(p)?)));
        registry.register("Rename", |p| Ok(Box::new(RenameStage::from_params(p)?)));
        registry.register("Slice", |p| Ok(Box::new(SliceStage::from_params(p)?)));
        registry.register("AmplitudePhase", |p| {
            Ok(Box::new(AmplitudePhaseStage::from_params(p)?))
        });
        registry.register("Cluster", |p| Ok(Box::new(ClusterStage::from_params(p)?)));
        registry
    }

    pub fn register(&mut self, name: &str, factory: StageFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn build(&self, entry: &Value) -> StageResult<Box<dyn Stage>> {
        let object = entry
            .as_object()
            .ok_or_else(|| StageError::Config("stage entry is not an object".into()))?;
        let type_name = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::Config("stage entry is missing its `type` tag".into()))?;
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| StageError::UnknownStage(type_name.to_string()))?;
        let mut params = object.clone();
        params.remove("type");
        factory(Value::Object(params))
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtin_stages()
    }
}

/// Persisted pipeline description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// `ProcessorCPU` or `ProcessorGPU`.
    #[serde(rename = "type")]
    pub processor: String,
    #[serde(default)]
    pub main_stages: Vec<Value>,
    #[serde(default)]
    pub final_stages: Vec<Value>,
}

/// Serializes one stage as `{ "type": ..., ...params }`.
pub fn stage_value(stage: &dyn Stage) -> StageResult<Value> {
    let mut params = stage.to_params()?;
    let object = params.as_object_mut().ok_or_else(|| {
        StageError::Internal(format!(
            "stage `{}` produced non-object parameters",
            stage.type_name()
        ))
    })?;
    object.insert(
        "type".to_string(),
        Value::String(stage.type_name().to_string()),
    );
    Ok(params)
}

/// Builds a processor from a persisted description.
///
/// Every stage entry is resolved against the registry before the processor
/// is constructed, so a stale configuration fails here rather than mid-run.
pub fn build_processor(
    config: &PipelineConfig,
    registry: &StageRegistry,
) -> StageResult<Box<dyn Processor>> {
    let main: Vec<Box<dyn Stage>> = config
        .main_stages
        .iter()
        .map(|entry| registry.build(entry))
        .collect::<StageResult<_>>()?;
    let finals: Vec<Box<dyn Stage>> = config
        .final_stages
        .iter()
        .map(|entry| registry.build(entry))
        .collect::<StageResult<_>>()?;

    let mut processor: Box<dyn Processor> = match config.processor.as_str() {
        "ProcessorCPU" => Box::new(HostProcessor::new(&config.name)),
        "ProcessorGPU" => Box::new(DeviceProcessor::new(&config.name)?),
        other => {
            return Err(StageError::Config(format!(
                "unknown processor type `{other}`"
            )))
        }
    };
    for stage in main {
        processor.add_main_stage(stage)?;
    }
    for stage in finals {
        processor.add_final_stage(stage)?;
    }
    Ok(processor)
}
