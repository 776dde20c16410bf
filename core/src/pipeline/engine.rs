use ndarray::{concatenate, ArrayViewD, Axis};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{Backend, BackendKind};
use crate::config::{stage_value, PipelineConfig};
use crate::daq_interface::{Channel, DataPacket, Tensor, AXIS_REPETITION};
use crate::prelude::{Stage, StageError, StageResult};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::MetricsRecorder;

/// Ordered processing pipeline bound to one execution backend.
///
/// Main stages run on every pushed packet individually; final stages run
/// once on the dataset concatenated along the repetition axis. The engine is
/// backend-agnostic: the installed [`Backend`] adapter decides where channel
/// arrays live between stages.
pub struct Pipeline {
    name: String,
    backend: Arc<dyn Backend>,
    main_stages: Vec<Box<dyn Stage>>,
    final_stages: Vec<Box<dyn Stage>>,
    pending: VecDeque<DataPacket>,
    processed: Vec<DataPacket>,
    metrics: MetricsRecorder,
    logger: LogManager,
}

impl Pipeline {
    pub fn new(name: &str, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.to_string(),
            backend,
            main_stages: Vec::new(),
            final_stages: Vec::new(),
            pending: VecDeque::new(),
            processed: Vec::new(),
            metrics: MetricsRecorder::new(),
            logger: LogManager::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Enqueues a packet after validating its invariants. Ownership of the
    /// packet's arrays transfers to the pipeline.
    pub fn push(&mut self, mut packet: DataPacket) -> StageResult<()> {
        packet.validate()?;
        self.backend.ingest_packet(&mut packet);
        self.pending.push_back(packet);
        Ok(())
    }

    pub fn ready(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs every queued packet through the main stages, in push order.
    pub fn process_pending(&mut self) -> StageResult<()> {
        while let Some(mut packet) = self.pending.pop_front() {
            for stage in &mut self.main_stages {
                packet = match stage.process(packet) {
                    Ok(packet) => packet,
                    Err(err) => {
                        self.metrics.record_stage_error();
                        return Err(err);
                    }
                };
                self.backend.ingest_packet(&mut packet);
            }
            self.metrics.record_packet();
            self.processed.push(packet);
        }
        Ok(())
    }

    /// Drains the queue, concatenates the processed packets, applies the
    /// final stages once and returns the host-resident result. Returns
    /// `None` when nothing was pushed since the last collect.
    pub fn collect(&mut self) -> StageResult<Option<DataPacket>> {
        self.process_pending()?;
        let Some(mut packet) = self.concatenate()? else {
            return Ok(None);
        };
        self.backend.ingest_packet(&mut packet);
        for stage in &mut self.final_stages {
            packet = match stage.process(packet) {
                Ok(packet) => packet,
                Err(err) => {
                    self.metrics.record_stage_error();
                    return Err(err);
                }
            };
            self.backend.ingest_packet(&mut packet);
        }
        self.backend.drain_packet(&mut packet);
        self.metrics.record_collect();
        self.logger.record(&format!(
            "pipeline `{}` collected {} channels over axes {:?}",
            self.name,
            packet.channels.len(),
            packet.axes
        ));
        Ok(Some(packet))
    }

    fn concatenate(&mut self) -> StageResult<Option<DataPacket>> {
        let mut packets = std::mem::take(&mut self.processed);
        if packets.is_empty() {
            return Ok(None);
        }
        if packets.len() == 1 {
            return Ok(packets.pop());
        }

        let axes = packets[0].axes.clone();
        let aux = packets[0].aux.clone();
        let names: Vec<String> = packets[0].channels.iter().map(|c| c.name.clone()).collect();
        let mut channels = Vec::with_capacity(names.len());
        for name in &names {
            let mut views: Vec<ArrayViewD<'_, f64>> = Vec::with_capacity(packets.len());
            for packet in &packets {
                let channel = packet.channel_by_name(name).ok_or_else(|| {
                    StageError::Shape(format!(
                        "channel `{name}` missing from a processed packet during concatenation"
                    ))
                })?;
                if channel.data.ndim() == 0 {
                    return Err(StageError::Config(format!(
                        "channel `{name}` is already a scalar in {} processed packets; \
                         a stage reducing every axis ran as a main stage instead of a final stage",
                        packets.len()
                    )));
                }
                views.push(channel.data.view());
            }
            let data = concatenate(Axis(0), &views).map_err(|err| {
                StageError::Shape(format!("concatenating channel `{name}`: {err}"))
            })?;
            channels.push(Channel::new(name.clone(), Tensor::from_host(data)));
        }
        Ok(Some(DataPacket {
            axes,
            channels,
            aux,
        }))
    }

    /// Clears both stage lists. Packets queued before the call are first
    /// drained through the stage lists they were pushed under.
    pub fn reset(&mut self) -> StageResult<()> {
        self.process_pending()?;
        self.main_stages.clear();
        self.final_stages.clear();
        Ok(())
    }

    pub fn add_main_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()> {
        if stage.reduces_axis() == Some(AXIS_REPETITION) {
            return Err(StageError::Config(format!(
                "stage `{}` reduces `{AXIS_REPETITION}` and must be registered as a final \
                 stage; main-stage outputs are concatenated along that axis",
                stage.type_name()
            )));
        }
        self.process_pending()?;
        self.main_stages.push(stage);
        Ok(())
    }

    pub fn add_final_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()> {
        self.process_pending()?;
        self.final_stages.push(stage);
        Ok(())
    }

    pub fn to_config(&self) -> StageResult<PipelineConfig> {
        Ok(PipelineConfig {
            name: self.name.clone(),
            processor: self.backend.kind().config_tag().to_string(),
            main_stages: self
                .main_stages
                .iter()
                .map(|s| stage_value(s.as_ref()))
                .collect::<StageResult<_>>()?,
            final_stages: self
                .final_stages
                .iter()
                .map(|s| stage_value(s.as_ref()))
                .collect::<StageResult<_>>()?,
        })
    }

    /// (packets processed, collects completed, stage errors)
    pub fn metrics_snapshot(&self) -> (usize, usize, usize) {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::daq_interface::{AXIS_SAMPLE, AXIS_SEGMENT};
    use crate::processing::reduce::{ReduceStage, Reduction};
    use ndarray::{Array1, Array3, ArrayD};

    const REPS: usize = 10;
    const SEGS: usize = 6;
    const SAMPLES: usize = 1024;

    fn ramp_block(rep_offset: usize, reps: usize) -> ArrayD<f64> {
        Array3::from_shape_fn((reps, SEGS, SAMPLES), |(r, s, n)| {
            ((rep_offset + r) * SEGS * SAMPLES + s * SAMPLES + n) as f64
        })
        .into_dyn()
    }

    fn ramp_packet(rep_offset: usize, reps: usize) -> DataPacket {
        DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE],
            vec![("ch0".into(), ramp_block(rep_offset, reps))],
            vec![1e9],
        )
        .unwrap()
    }

    fn mean_pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new("test", Arc::new(HostBackend));
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_SAMPLE)))
            .unwrap();
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_SEGMENT)))
            .unwrap();
        pipeline
            .add_final_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_REPETITION)))
            .unwrap();
        pipeline
    }

    fn scalar_of(packet: &DataPacket) -> f64 {
        assert_eq!(packet.channels[0].data.ndim(), 0);
        packet.channels[0].data.view().iter().copied().next().unwrap()
    }

    #[test]
    fn full_volume_mean_matches_closed_form() {
        let mut pipeline = mean_pipeline();
        pipeline.push(ramp_packet(0, REPS)).unwrap();
        let packet = pipeline.collect().unwrap().unwrap();
        let total = (REPS * SEGS * SAMPLES) as f64;
        let expected = (total - 1.0) / 2.0;
        let got = scalar_of(&packet);
        assert!(
            ((got - expected) / expected).abs() < 1e-12,
            "{got} vs {expected}"
        );
    }

    #[test]
    fn split_pushes_match_a_single_push() {
        let mut single = mean_pipeline();
        single.push(ramp_packet(0, REPS)).unwrap();
        let single_result = scalar_of(&single.collect().unwrap().unwrap());

        let mut split = mean_pipeline();
        split.push(ramp_packet(0, 2)).unwrap();
        split.push(ramp_packet(2, 8)).unwrap();
        let split_result = scalar_of(&split.collect().unwrap().unwrap());

        assert_eq!(single_result.to_bits(), split_result.to_bits());
    }

    #[test]
    fn repeated_integrate_equals_full_volume_sum() {
        let mut pipeline = Pipeline::new("sum", Arc::new(HostBackend));
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Integrate, AXIS_SAMPLE)))
            .unwrap();
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Integrate, AXIS_SEGMENT)))
            .unwrap();
        pipeline
            .add_final_stage(Box::new(ReduceStage::new(
                Reduction::Integrate,
                AXIS_REPETITION,
            )))
            .unwrap();
        pipeline.push(ramp_packet(0, REPS)).unwrap();
        let packet = pipeline.collect().unwrap().unwrap();
        let total = (REPS * SEGS * SAMPLES) as f64;
        let expected = total * (total - 1.0) / 2.0;
        assert!((scalar_of(&packet) - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn collect_without_pushes_returns_none() {
        let mut pipeline = mean_pipeline();
        assert!(pipeline.collect().unwrap().is_none());
        pipeline.push(ramp_packet(0, 2)).unwrap();
        assert!(pipeline.collect().unwrap().is_some());
        // a second collect without new pushes is empty again
        assert!(pipeline.collect().unwrap().is_none());
    }

    #[test]
    fn repetition_reduction_is_rejected_as_main_stage() {
        let mut pipeline = Pipeline::new("bad", Arc::new(HostBackend));
        let err = pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_REPETITION)))
            .unwrap_err();
        assert!(matches!(err, StageError::Config(_)));
    }

    #[test]
    fn scalar_channels_across_multiple_packets_are_reported() {
        // a custom axis fully reduced by a main stage leaves scalars that
        // cannot be concatenated once more than one packet arrives
        let mut pipeline = Pipeline::new("scalar", Arc::new(HostBackend));
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, "trial")))
            .unwrap();
        for _ in 0..2 {
            let data = Array1::from_vec(vec![1.0, 2.0, 3.0]).into_dyn();
            let packet =
                DataPacket::from_arrays(&["trial"], vec![("ch0".into(), data)], vec![1e9])
                    .unwrap();
            pipeline.push(packet).unwrap();
        }
        let err = pipeline.collect().unwrap_err();
        assert!(matches!(err, StageError::Config(_)));
    }

    #[test]
    fn single_scalar_packet_is_kept_as_is() {
        let mut pipeline = Pipeline::new("scalar", Arc::new(HostBackend));
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, "trial")))
            .unwrap();
        let data = Array1::from_vec(vec![1.0, 2.0, 3.0]).into_dyn();
        let packet =
            DataPacket::from_arrays(&["trial"], vec![("ch0".into(), data)], vec![1e9]).unwrap();
        pipeline.push(packet).unwrap();
        let collected = pipeline.collect().unwrap().unwrap();
        assert!((scalar_of(&collected) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn structural_changes_do_not_affect_queued_packets() {
        let mut pipeline = Pipeline::new("late", Arc::new(HostBackend));
        pipeline.push(ramp_packet(0, 2)).unwrap();
        // added after the push: the queued packet must not see this stage
        pipeline
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_SAMPLE)))
            .unwrap();
        let packet = pipeline.collect().unwrap().unwrap();
        assert_eq!(
            packet.axes,
            vec![AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE]
        );
    }

    #[test]
    fn reset_clears_both_stage_lists() {
        let mut pipeline = mean_pipeline();
        pipeline.reset().unwrap();
        pipeline.push(ramp_packet(0, 2)).unwrap();
        let packet = pipeline.collect().unwrap().unwrap();
        // untouched data: all three axes survive
        assert_eq!(packet.axes.len(), 3);
        assert_eq!(packet.channels[0].data.shape(), &[2, SEGS, SAMPLES]);
    }

    #[test]
    fn mismatched_channel_sets_fail_concatenation() {
        let mut pipeline = Pipeline::new("names", Arc::new(HostBackend));
        let a = DataPacket::from_arrays(
            &[AXIS_REPETITION],
            vec![("ch0".into(), Array1::from_vec(vec![1.0]).into_dyn())],
            vec![1e9],
        )
        .unwrap();
        let b = DataPacket::from_arrays(
            &[AXIS_REPETITION],
            vec![("other".into(), Array1::from_vec(vec![2.0]).into_dyn())],
            vec![1e9],
        )
        .unwrap();
        pipeline.push(a).unwrap();
        pipeline.push(b).unwrap();
        assert!(matches!(
            pipeline.collect().unwrap_err(),
            StageError::Shape(_)
        ));
    }
}
