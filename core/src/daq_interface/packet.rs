use ndarray::ArrayD;

use crate::daq_interface::tensor::Tensor;
use crate::prelude::{StageError, StageResult};

pub const AXIS_REPETITION: &str = "repetition";
pub const AXIS_SEGMENT: &str = "segment";
pub const AXIS_SAMPLE: &str = "sample";

/// One named channel array inside a packet.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub data: Tensor,
}

impl Channel {
    pub fn new(name: impl Into<String>, data: Tensor) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Side-channel metadata accompanying each packet.
///
/// `sample_rates` holds one entry per channel; stages that add or remove
/// channels add or remove the matching entries so the two lists never drift.
#[derive(Debug, Clone, Default)]
pub struct AuxData {
    pub sample_rates: Vec<f64>,
    pub notes: Vec<String>,
}

/// The unit of data flowing through the pipeline.
///
/// `axes` is the dimension order of every channel array; channel order is
/// semantically meaningful because several stages address channels by
/// position rather than by name.
#[derive(Debug, Clone)]
pub struct DataPacket {
    pub axes: Vec<String>,
    pub channels: Vec<Channel>,
    pub aux: AuxData,
}

impl DataPacket {
    /// Builds a packet from host arrays, validating the shape invariants.
    pub fn from_arrays(
        axes: &[&str],
        channels: Vec<(String, ArrayD<f64>)>,
        sample_rates: Vec<f64>,
    ) -> StageResult<Self> {
        let packet = Self {
            axes: axes.iter().map(|a| a.to_string()).collect(),
            channels: channels
                .into_iter()
                .map(|(name, data)| Channel::new(name, Tensor::from_host(data)))
                .collect(),
            aux: AuxData {
                sample_rates,
                notes: Vec::new(),
            },
        };
        packet.validate()?;
        Ok(packet)
    }

    pub fn axis_index(&self, axis: &str) -> Option<usize> {
        self.axes.iter().position(|a| a == axis)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> StageResult<&Channel> {
        self.channels.get(index).ok_or_else(|| {
            StageError::Shape(format!(
                "channel index {index} out of range ({} channels)",
                self.channels.len()
            ))
        })
    }

    pub fn channel_by_name(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Checks the packet invariants: channel rank equals the axis count, all
    /// channels share one repetition extent, and the sample-rate list tracks
    /// the channel list 1:1.
    pub fn validate(&self) -> StageResult<()> {
        for channel in &self.channels {
            if channel.data.ndim() != self.axes.len() {
                return Err(StageError::Shape(format!(
                    "channel `{}` has rank {} but the packet declares {} axes",
                    channel.name,
                    channel.data.ndim(),
                    self.axes.len()
                )));
            }
        }
        if let Some(rep) = self.axis_index(AXIS_REPETITION) {
            let mut extents = self.channels.iter().map(|c| c.data.shape()[rep]);
            if let Some(first) = extents.next() {
                if extents.any(|e| e != first) {
                    return Err(StageError::Shape(format!(
                        "channels disagree on the `{AXIS_REPETITION}` extent within one packet"
                    )));
                }
            }
        }
        if self.aux.sample_rates.len() != self.channels.len() {
            return Err(StageError::Config(format!(
                "sample_rates has {} entries for {} channels",
                self.aux.sample_rates.len(),
                self.channels.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(reps: usize, segs: usize, samples: usize) -> ArrayD<f64> {
        Array3::from_shape_fn((reps, segs, samples), |(r, s, n)| {
            (r * segs * samples + s * samples + n) as f64
        })
        .into_dyn()
    }

    #[test]
    fn from_arrays_accepts_consistent_packet() {
        let packet = DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE],
            vec![("ch0".into(), ramp(2, 3, 8)), ("ch1".into(), ramp(2, 3, 8))],
            vec![1e9, 1e9],
        )
        .unwrap();
        assert_eq!(packet.channel_count(), 2);
        assert_eq!(packet.axis_index(AXIS_SAMPLE), Some(2));
    }

    #[test]
    fn validate_rejects_rank_mismatch() {
        let err = DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SEGMENT],
            vec![("ch0".into(), ramp(2, 3, 8))],
            vec![1e9],
        )
        .unwrap_err();
        assert!(matches!(err, StageError::Shape(_)));
    }

    #[test]
    fn validate_rejects_repetition_extent_mismatch() {
        let err = DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE],
            vec![("ch0".into(), ramp(2, 3, 8)), ("ch1".into(), ramp(4, 3, 8))],
            vec![1e9, 1e9],
        )
        .unwrap_err();
        assert!(matches!(err, StageError::Shape(_)));
    }

    #[test]
    fn validate_rejects_sample_rate_drift() {
        let err = DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE],
            vec![("ch0".into(), ramp(2, 3, 8))],
            vec![1e9, 1e9],
        )
        .unwrap_err();
        assert!(matches!(err, StageError::Config(_)));
    }
}
