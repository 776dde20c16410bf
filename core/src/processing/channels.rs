use ndarray::{Axis, Slice, Zip};
use serde::{Deserialize, Serialize};

use crate::daq_interface::{Channel, DataPacket, Tensor};
use crate::prelude::{Stage, StageError, StageResult};

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

fn check_channel_index(stage: &'static str, index: usize, packet: &DataPacket) -> StageResult<()> {
    if index >= packet.channels.len() {
        return Err(StageError::Shape(format!(
            "{stage} stage: channel index {index} out of range ({} channels)",
            packet.channels.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Duplicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateConfig {
    pub channel: usize,
    pub copies: usize,
}

/// Inserts N clones of one channel directly after it, named `<name>_1..N`.
pub struct DuplicateStage {
    config: DuplicateConfig,
}

impl DuplicateStage {
    pub fn new(channel: usize, copies: usize) -> Self {
        Self {
            config: DuplicateConfig { channel, copies },
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: DuplicateConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("Duplicate stage parameters: {err}")))?;
        Ok(Self { config })
    }
}

impl Stage for DuplicateStage {
    fn type_name(&self) -> &'static str {
        "Duplicate"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        check_rate_tracking("Duplicate", &packet)?;
        let index = self.config.channel;
        check_channel_index("Duplicate", index, &packet)?;

        let source_name = packet.channels[index].name.clone();
        let source_data = packet.channels[index].data.clone();
        let rate = packet.aux.sample_rates[index];
        for copy in 1..=self.config.copies {
            packet.channels.insert(
                index + copy,
                Channel::new(format!("{source_name}_{copy}"), source_data.clone()),
            );
            packet.aux.sample_rates.insert(index + copy, rate);
        }
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Rename
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameConfig {
    pub names: Vec<String>,
}

/// 1:1 bulk channel-name substitution; order and arrays are untouched.
pub struct RenameStage {
    config: RenameConfig,
}

impl RenameStage {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            config: RenameConfig { names },
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: RenameConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("Rename stage parameters: {err}")))?;
        Ok(Self { config })
    }
}

impl Stage for RenameStage {
    fn type_name(&self) -> &'static str {
        "Rename"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        if self.config.names.len() != packet.channels.len() {
            return Err(StageError::Config(format!(
                "Rename stage provides {} names for {} channels",
                self.config.names.len(),
                packet.channels.len()
            )));
        }
        for (channel, name) in packet.channels.iter_mut().zip(&self.config.names) {
            channel.name = name.clone();
        }
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Slice
// ---------------------------------------------------------------------------

fn default_step() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceRange {
    #[serde(default)]
    pub start: usize,
    /// Exclusive; the axis extent when unset.
    #[serde(default)]
    pub stop: Option<usize>,
    #[serde(default = "default_step")]
    pub step: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceConfig {
    pub axis: String,
    pub slices: Vec<SliceRange>,
}

/// Replaces every channel by one sub-channel per configured slice along one
/// axis, named `<name>_<slice index>`.
pub struct SliceStage {
    config: SliceConfig,
}

impl SliceStage {
    pub fn new(axis: impl Into<String>, slices: Vec<SliceRange>) -> Self {
        Self {
            config: SliceConfig {
                axis: axis.into(),
                slices,
            },
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: SliceConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("Slice stage parameters: {err}")))?;
        Ok(Self { config })
    }
}

impl Stage for SliceStage {
    fn type_name(&self) -> &'static str {
        "Slice"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        check_rate_tracking("Slice", &packet)?;
        let axis = packet.axis_index(&self.config.axis).ok_or_else(|| {
            StageError::Shape(format!(
                "Slice stage: axis `{}` not present in packet",
                self.config.axis
            ))
        })?;
        if self.config.slices.is_empty() {
            return Err(StageError::Config("Slice stage has no slices".into()));
        }
        for range in &self.config.slices {
            if range.step == 0 {
                return Err(StageError::Config("Slice stage: step must be >= 1".into()));
            }
        }

        let old_channels = std::mem::take(&mut packet.channels);
        let old_rates = std::mem::take(&mut packet.aux.sample_rates);
        let mut channels = Vec::with_capacity(old_channels.len() * self.config.slices.len());
        let mut rates = Vec::with_capacity(channels.capacity());

        for (channel, rate) in old_channels.into_iter().zip(old_rates) {
            let extent = channel.data.shape()[axis];
            for (slice_index, range) in self.config.slices.iter().enumerate() {
                let stop = range.stop.unwrap_or(extent);
                if range.start > stop || stop > extent {
                    return Err(StageError::Shape(format!(
                        "Slice stage: range {}..{} (step {}) out of bounds for axis `{}` of extent {extent}",
                        range.start, stop, range.step, self.config.axis
                    )));
                }
                let sliced = channel
                    .data
                    .view()
                    .slice_axis(
                        Axis(axis),
                        Slice::new(range.start as isize, Some(stop as isize), range.step as isize),
                    )
                    .to_owned();
                channels.push(Channel::new(
                    format!("{}_{}", channel.name, slice_index),
                    Tensor::from_host(sliced),
                ));
                rates.push(rate);
            }
        }
        packet.channels = channels;
        packet.aux.sample_rates = rates;
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Amplitude / phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmplitudePhaseConfig {}

/// Converts consecutive (I, Q) channel pairs into amplitude and phase
/// channels (`hypot`, `atan2`).
pub struct AmplitudePhaseStage {
    config: AmplitudePhaseConfig,
}

impl AmplitudePhaseStage {
    pub fn new() -> Self {
        Self {
            config: AmplitudePhaseConfig {},
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: AmplitudePhaseConfig = serde_json::from_value(params).map_err(|err| {
            StageError::Config(format!("AmplitudePhase stage parameters: {err}"))
        })?;
        Ok(Self { config })
    }
}

impl Default for AmplitudePhaseStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AmplitudePhaseStage {
    fn type_name(&self) -> &'static str {
        "AmplitudePhase"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        check_rate_tracking("AmplitudePhase", &packet)?;
        if packet.channels.len() % 2 != 0 {
            return Err(StageError::Config(format!(
                "AmplitudePhase stage needs channels in (I, Q) pairs, got {}",
                packet.channels.len()
            )));
        }

        let old_channels = std::mem::take(&mut packet.channels);
        let old_rates = std::mem::take(&mut packet.aux.sample_rates);
        let mut channels = Vec::with_capacity(old_channels.len());
        let mut rates = Vec::with_capacity(old_rates.len());
        let mut channel_iter = old_channels.into_iter();
        let mut rate_iter = old_rates.into_iter();

        while let (Some(i_ch), Some(q_ch)) = (channel_iter.next(), channel_iter.next()) {
            let i_view = i_ch.data.view();
            let q_view = q_ch.data.view();
            if i_view.shape() != q_view.shape() {
                return Err(StageError::Shape(format!(
                    "AmplitudePhase stage: pair `{}`/`{}` has shapes {:?} and {:?}",
                    i_ch.name,
                    q_ch.name,
                    i_view.shape(),
                    q_view.shape()
                )));
            }
            let amplitude = Zip::from(&i_view)
                .and(&q_view)
                .map_collect(|&i, &q| i.hypot(q));
            let phase = Zip::from(&i_view)
                .and(&q_view)
                .map_collect(|&i, &q| q.atan2(i));

            let base = i_ch
                .name
                .strip_suffix("_I")
                .unwrap_or(&i_ch.name)
                .to_string();
            channels.push(Channel::new(
                format!("{base}_amp"),
                Tensor::from_host(amplitude),
            ));
            channels.push(Channel::new(
                format!("{base}_phase"),
                Tensor::from_host(phase),
            ));
            if let (Some(ri), Some(rq)) = (rate_iter.next(), rate_iter.next()) {
                rates.push(ri);
                rates.push(rq);
            }
        }
        packet.channels = channels;
        packet.aux.sample_rates = rates;
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// The (I, Q) channel pair to discriminate.
    pub channels: [usize; 2],
    pub centroids: Vec<[f64; 2]>,
}

/// Nearest-centroid state discrimination on an (I, Q) pair; the two inputs
/// are replaced by one `<left>_state` channel of centroid indices.
pub struct ClusterStage {
    config: ClusterConfig,
}

impl ClusterStage {
    pub fn new(channels: [usize; 2], centroids: Vec<[f64; 2]>) -> Self {
        Self {
            config: ClusterConfig {
                channels,
                centroids,
            },
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: ClusterConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("Cluster stage parameters: {err}")))?;
        Ok(Self { config })
    }

    fn nearest(&self, i: f64, q: f64) -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (index, [ci, cq]) in self.config.centroids.iter().enumerate() {
            let distance = (i - ci).powi(2) + (q - cq).powi(2);
            if distance < best_distance {
                best_distance = distance;
                best = index;
            }
        }
        best
    }
}

impl Stage for ClusterStage {
    fn type_name(&self) -> &'static str {
        "Cluster"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        check_rate_tracking("Cluster", &packet)?;
        if self.config.centroids.is_empty() {
            return Err(StageError::Config("Cluster stage has no centroids".into()));
        }
        let [left, right] = self.config.channels;
        if left == right {
            return Err(StageError::Config(
                "Cluster stage needs two distinct channel indices".into(),
            ));
        }
        for index in [left, right] {
            check_channel_index("Cluster", index, &packet)?;
        }

        let i_view = packet.channels[left].data.view();
        let q_view = packet.channels[right].data.view();
        if i_view.shape() != q_view.shape() {
            return Err(StageError::Shape(format!(
                "Cluster stage: channels {left} and {right} have shapes {:?} and {:?}",
                i_view.shape(),
                q_view.shape()
            )));
        }
        let states = Zip::from(&i_view)
            .and(&q_view)
            .map_collect(|&i, &q| self.nearest(i, q) as f64);
        let name = format!("{}_state", packet.channels[left].name);
        let rate = packet.aux.sample_rates[left];

        for index in [left.max(right), left.min(right)] {
            packet.channels.remove(index);
            packet.aux.sample_rates.remove(index);
        }
        packet.channels.push(Channel::new(name, Tensor::from_host(states)));
        packet.aux.sample_rates.push(rate);
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq_interface::{AXIS_REPETITION, AXIS_SAMPLE};
    use ndarray::Array2;

    fn packet() -> DataPacket {
        let a = Array2::from_shape_fn((2, 6), |(r, n)| (r * 6 + n) as f64).into_dyn();
        let b = Array2::from_elem((2, 6), 1.0).into_dyn();
        DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SAMPLE],
            vec![("sig".into(), a), ("ref".into(), b)],
            vec![2e9, 1e9],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_inserts_suffixed_copies_after_the_source() {
        let mut stage = DuplicateStage::new(0, 2);
        let result = stage.process(packet()).unwrap();
        let names: Vec<&str> = result.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sig", "sig_1", "sig_2", "ref"]);
        assert_eq!(result.aux.sample_rates, vec![2e9, 2e9, 2e9, 1e9]);
    }

    #[test]
    fn rename_substitutes_all_names_in_order() {
        let mut stage = RenameStage::new(vec!["readout".into(), "drive".into()]);
        let result = stage.process(packet()).unwrap();
        let names: Vec<&str> = result.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["readout", "drive"]);
    }

    #[test]
    fn rename_length_mismatch_is_a_config_error() {
        let mut stage = RenameStage::new(vec!["only_one".into()]);
        assert!(matches!(
            stage.process(packet()).unwrap_err(),
            StageError::Config(_)
        ));
    }

    #[test]
    fn slice_produces_one_channel_per_range() {
        let mut stage = SliceStage::new(
            AXIS_SAMPLE,
            vec![
                SliceRange {
                    start: 0,
                    stop: Some(3),
                    step: 1,
                },
                SliceRange {
                    start: 3,
                    stop: None,
                    step: 1,
                },
            ],
        );
        let result = stage.process(packet()).unwrap();
        let names: Vec<&str> = result.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sig_0", "sig_1", "ref_0", "ref_1"]);
        assert_eq!(result.channels[0].data.shape(), &[2, 3]);
        assert_eq!(result.channels[1].data.view()[[0, 0]], 3.0);
        assert_eq!(result.aux.sample_rates, vec![2e9, 2e9, 1e9, 1e9]);
    }

    #[test]
    fn slice_out_of_bounds_is_a_shape_error() {
        let mut stage = SliceStage::new(
            AXIS_SAMPLE,
            vec![SliceRange {
                start: 0,
                stop: Some(99),
                step: 1,
            }],
        );
        assert!(matches!(
            stage.process(packet()).unwrap_err(),
            StageError::Shape(_)
        ));
    }

    #[test]
    fn amplitude_phase_converts_pairs() {
        let i = Array2::from_elem((1, 4), 3.0).into_dyn();
        let q = Array2::from_elem((1, 4), 4.0).into_dyn();
        let packet = DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SAMPLE],
            vec![("ch0_I".into(), i), ("ch0_Q".into(), q)],
            vec![1e9, 1e9],
        )
        .unwrap();
        let mut stage = AmplitudePhaseStage::new();
        let result = stage.process(packet).unwrap();
        let names: Vec<&str> = result.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ch0_amp", "ch0_phase"]);
        assert!((result.channels[0].data.view()[[0, 0]] - 5.0).abs() < 1e-12);
        assert!((result.channels[1].data.view()[[0, 0]] - (4.0f64).atan2(3.0)).abs() < 1e-12);
    }

    #[test]
    fn cluster_assigns_nearest_centroid_indices() {
        let i = Array2::from_shape_vec((1, 4), vec![0.1, 0.9, 0.2, 1.1])
            .unwrap()
            .into_dyn();
        let q = Array2::from_shape_vec((1, 4), vec![0.0, 0.1, -0.1, 0.0])
            .unwrap()
            .into_dyn();
        let packet = DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SAMPLE],
            vec![("ro_I".into(), i), ("ro_Q".into(), q)],
            vec![1e9, 1e9],
        )
        .unwrap();
        let mut stage = ClusterStage::new([0, 1], vec![[0.0, 0.0], [1.0, 0.0]]);
        let result = stage.process(packet).unwrap();
        assert_eq!(result.channels.len(), 1);
        assert_eq!(result.channels[0].name, "ro_I_state");
        let states: Vec<f64> = result.channels[0].data.view().iter().copied().collect();
        assert_eq!(states, vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(result.aux.sample_rates, vec![1e9]);
    }
}
