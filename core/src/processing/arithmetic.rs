use serde::{Deserialize, Serialize};

use crate::daq_interface::{Channel, DataPacket, Tensor};
use crate::prelude::{Stage, StageError, StageResult};

/// Elementwise binary operator, serialized as its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
}

impl Op {
    pub fn token(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Rem => "%",
        }
    }

    /// Degenerate cases (division or modulo by zero) propagate the IEEE
    /// result untouched so downstream analysis can detect them.
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Op::Add => lhs + rhs,
            Op::Sub => lhs - rhs,
            Op::Mul => lhs * rhs,
            Op::Div => lhs / rhs,
            Op::Rem => lhs % rhs,
        }
    }
}

fn check_rate_tracking(stage: &'static str, packet: &DataPacket) -> StageResult<()> {
    if packet.aux.sample_rates.len() != packet.channels.len() {
        return Err(StageError::Config(format!(
            "{stage} stage: sample_rates has {} entries for {} channels",
            packet.aux.sample_rates.len(),
            packet.channels.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Constant arithmetic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantArithmeticConfig {
    pub operator: Op,
    pub constant: f64,
    /// Positional channel indices; all channels when unset.
    #[serde(default)]
    pub channels: Option<Vec<usize>>,
}

/// Applies `channel op constant` in place to the selected channels.
pub struct ConstantArithmeticStage {
    config: ConstantArithmeticConfig,
}

impl ConstantArithmeticStage {
    pub fn new(operator: Op, constant: f64, channels: Option<Vec<usize>>) -> Self {
        Self {
            config: ConstantArithmeticConfig {
                operator,
                constant,
                channels,
            },
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: ConstantArithmeticConfig = serde_json::from_value(params).map_err(|err| {
            StageError::Config(format!("ConstantArithmetic stage parameters: {err}"))
        })?;
        Ok(Self { config })
    }
}

impl Stage for ConstantArithmeticStage {
    fn type_name(&self) -> &'static str {
        "ConstantArithmetic"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        let indices: Vec<usize> = match &self.config.channels {
            Some(selected) => selected.clone(),
            None => (0..packet.channels.len()).collect(),
        };
        let op = self.config.operator;
        let constant = self.config.constant;

        for index in indices {
            if index >= packet.channels.len() {
                return Err(StageError::Shape(format!(
                    "ConstantArithmetic stage: channel index {index} out of range ({} channels)",
                    packet.channels.len()
                )));
            }
            let tensor = std::mem::take(&mut packet.channels[index].data);
            let mut array = tensor.into_host();
            array.mapv_inplace(|v| op.apply(v, constant));
            packet.channels[index].data = Tensor::from_host(array);
        }
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Inter-channel arithmetic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelArithmeticConfig {
    /// Two positional channel indices; they may be equal.
    pub channels: [usize; 2],
    pub operator: Op,
    /// Remove the input channels (and their rate entries) after the op.
    #[serde(default)]
    pub discard: bool,
}

/// Writes `left op right` into a new channel named `<left>_<op>_<right>`.
pub struct ChannelArithmeticStage {
    config: ChannelArithmeticConfig,
}

impl ChannelArithmeticStage {
    pub fn new(channels: [usize; 2], operator: Op, discard: bool) -> Self {
        Self {
            config: ChannelArithmeticConfig {
                channels,
                operator,
                discard,
            },
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: ChannelArithmeticConfig = serde_json::from_value(params).map_err(|err| {
            StageError::Config(format!("ChannelArithmetic stage parameters: {err}"))
        })?;
        Ok(Self { config })
    }
}

impl Stage for ChannelArithmeticStage {
    fn type_name(&self) -> &'static str {
        "ChannelArithmetic"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        check_rate_tracking("ChannelArithmetic", &packet)?;
        let [left, right] = self.config.channels;
        for index in [left, right] {
            if index >= packet.channels.len() {
                return Err(StageError::Shape(format!(
                    "ChannelArithmetic stage: channel index {index} out of range ({} channels)",
                    packet.channels.len()
                )));
            }
        }

        let a = packet.channels[left].data.view();
        let b = packet.channels[right].data.view();
        if a.shape() != b.shape() {
            return Err(StageError::Shape(format!(
                "ChannelArithmetic stage: channels {left} and {right} have shapes {:?} and {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let result = match self.config.operator {
            Op::Add => &a + &b,
            Op::Sub => &a - &b,
            Op::Mul => &a * &b,
            Op::Div => &a / &b,
            Op::Rem => &a % &b,
        };
        let name = format!(
            "{}_{}_{}",
            packet.channels[left].name,
            self.config.operator.token(),
            packet.channels[right].name
        );
        let rate = packet.aux.sample_rates[left];

        if self.config.discard {
            // equal indices are deduplicated so no other channel is deleted
            let mut remove = vec![left, right];
            remove.sort_unstable();
            remove.dedup();
            for index in remove.into_iter().rev() {
                packet.channels.remove(index);
                packet.aux.sample_rates.remove(index);
            }
        }
        packet.channels.push(Channel::new(name, Tensor::from_host(result)));
        packet.aux.sample_rates.push(rate);
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}
