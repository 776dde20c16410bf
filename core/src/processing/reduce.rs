use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::daq_interface::{DataPacket, Tensor};
use crate::prelude::{Stage, StageError, StageResult};
use crate::telemetry::log::LogManager;

/// Reduction applied along one named axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Integrate,
    Max,
}

impl Reduction {
    fn type_name(self) -> &'static str {
        match self {
            Reduction::Mean => "Mean",
            Reduction::Integrate => "Integrate",
            Reduction::Max => "Max",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceConfig {
    pub axis: String,
}

/// Collapses one named axis of every channel (mean, sum or maximum).
///
/// A reduction over `repetition` must run as a final stage; the pipeline
/// rejects it in the main list because main-stage outputs are concatenated
/// along that axis afterwards.
pub struct ReduceStage {
    reduction: Reduction,
    config: ReduceConfig,
    logger: LogManager,
}

impl ReduceStage {
    pub fn new(reduction: Reduction, axis: impl Into<String>) -> Self {
        Self {
            reduction,
            config: ReduceConfig { axis: axis.into() },
            logger: LogManager::new(),
        }
    }

    pub fn from_params(reduction: Reduction, params: serde_json::Value) -> StageResult<Self> {
        let config: ReduceConfig = serde_json::from_value(params).map_err(|err| {
            StageError::Config(format!(
                "{} stage parameters: {err}",
                reduction.type_name()
            ))
        })?;
        Ok(Self {
            reduction,
            config,
            logger: LogManager::new(),
        })
    }
}

impl Stage for ReduceStage {
    fn type_name(&self) -> &'static str {
        self.reduction.type_name()
    }

    fn reduces_axis(&self) -> Option<&str> {
        Some(&self.config.axis)
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        let Some(index) = packet.axis_index(&self.config.axis) else {
            self.logger.warn(&format!(
                "{} stage: axis `{}` not present in packet; passing through unchanged",
                self.type_name(),
                self.config.axis
            ));
            return Ok(packet);
        };

        for channel in &mut packet.channels {
            let view = channel.data.view();
            let reduced = match self.reduction {
                Reduction::Mean => view.mean_axis(Axis(index)).ok_or_else(|| {
                    StageError::Shape(format!(
                        "Mean stage: axis `{}` is empty for channel `{}`",
                        self.config.axis, channel.name
                    ))
                })?,
                Reduction::Integrate => view.sum_axis(Axis(index)),
                Reduction::Max => {
                    view.fold_axis(Axis(index), f64::NEG_INFINITY, |acc, &v| acc.max(v))
                }
            };
            channel.data = Tensor::from_host(reduced);
        }
        packet.axes.remove(index);
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}
