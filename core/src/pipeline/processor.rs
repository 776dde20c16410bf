use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::backend::{BackendKind, DeviceBackend, HostBackend};
use crate::config::PipelineConfig;
use crate::daq_interface::DataPacket;
use crate::pipeline::engine::Pipeline;
use crate::prelude::{Stage, StageError, StageResult};

/// Backend-facing processor contract.
///
/// Both implementations run the identical [`Pipeline`] logic; they differ in
/// where channel arrays live and on which execution context the main-stage
/// drain runs.
pub trait Processor: Send {
    fn name(&self) -> &str;
    fn backend_kind(&self) -> BackendKind;

    /// Non-blocking enqueue; packet ownership transfers to the pipeline.
    fn push(&mut self, packet: DataPacket) -> StageResult<()>;

    /// True when no asynchronous work is outstanding.
    fn ready(&self) -> bool;

    /// Blocking collect: drains anything still pending and returns the
    /// aggregated host-resident result.
    fn collect(&mut self) -> StageResult<Option<DataPacket>>;

    fn reset(&mut self) -> StageResult<()>;
    fn add_main_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()>;
    fn add_final_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()>;
    fn to_config(&self) -> StageResult<PipelineConfig>;

    /// (packets processed, collects completed, stage errors)
    fn metrics(&self) -> (usize, usize, usize);
}

/// Host-memory processor; all processing runs on the caller's thread.
pub struct HostProcessor {
    pipeline: Pipeline,
}

impl HostProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            pipeline: Pipeline::new(name, Arc::new(HostBackend)),
        }
    }
}

impl Processor for HostProcessor {
    fn name(&self) -> &str {
        self.pipeline.name()
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn push(&mut self, packet: DataPacket) -> StageResult<()> {
        self.pipeline.push(packet)
    }

    fn ready(&self) -> bool {
        true
    }

    fn collect(&mut self) -> StageResult<Option<DataPacket>> {
        self.pipeline.collect()
    }

    fn reset(&mut self) -> StageResult<()> {
        self.pipeline.reset()
    }

    fn add_main_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()> {
        self.pipeline.add_main_stage(stage)
    }

    fn add_final_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()> {
        self.pipeline.add_final_stage(stage)
    }

    fn to_config(&self) -> StageResult<PipelineConfig> {
        self.pipeline.to_config()
    }

    fn metrics(&self) -> (usize, usize, usize) {
        self.pipeline.metrics_snapshot()
    }
}

/// Device-memory processor; main-stage drains are offloaded to one dedicated
/// background worker, with at most one task in flight.
///
/// A push observed while a task runs only enqueues; the packets it leaves
/// behind are drained by the next schedule or by the blocking [`collect`].
/// Stage errors raised in the background are stashed and re-raised by the
/// next `collect`.
///
/// [`collect`]: Processor::collect
pub struct DeviceProcessor {
    name: String,
    pipeline: Arc<Mutex<Pipeline>>,
    runtime: tokio::runtime::Runtime,
    in_flight: Arc<AtomicBool>,
    done: Arc<Notify>,
    background_error: Arc<std::sync::Mutex<Option<StageError>>>,
}

impl DeviceProcessor {
    pub fn new(name: &str) -> StageResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("daq-device-worker")
            .build()
            .map_err(|err| StageError::Internal(format!("starting device worker: {err}")))?;
        Ok(Self {
            name: name.to_string(),
            pipeline: Arc::new(Mutex::new(Pipeline::new(name, Arc::new(DeviceBackend)))),
            runtime,
            in_flight: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Notify::new()),
            background_error: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    fn schedule(&self) {
        // at most one worker task in flight per pipeline
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let pipeline = Arc::clone(&self.pipeline);
        let in_flight = Arc::clone(&self.in_flight);
        let done = Arc::clone(&self.done);
        let error_slot = Arc::clone(&self.background_error);
        self.runtime.spawn(async move {
            let mut guard = pipeline.lock().await;
            if let Err(err) = guard.process_pending() {
                if let Ok(mut slot) = error_slot.lock() {
                    slot.get_or_insert(err);
                }
            }
            drop(guard);
            in_flight.store(false, Ordering::Release);
            done.notify_one();
        });
    }

    fn wait_idle(&self) {
        if !self.in_flight.load(Ordering::Acquire) {
            return;
        }
        self.runtime.block_on(async {
            while self.in_flight.load(Ordering::Acquire) {
                self.done.notified().await;
            }
        });
    }

    fn take_background_error(&self) -> Option<StageError> {
        self.background_error
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }
}

impl Processor for DeviceProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn push(&mut self, packet: DataPacket) -> StageResult<()> {
        self.pipeline.blocking_lock().push(packet)?;
        self.schedule();
        Ok(())
    }

    fn ready(&self) -> bool {
        if self.in_flight.load(Ordering::Acquire) {
            return false;
        }
        match self.pipeline.try_lock() {
            Ok(pipeline) => pipeline.ready(),
            Err(_) => false,
        }
    }

    fn collect(&mut self) -> StageResult<Option<DataPacket>> {
        self.wait_idle();
        if let Some(err) = self.take_background_error() {
            return Err(err);
        }
        // final synchronous drain so nothing pushed meanwhile is left behind
        self.pipeline.blocking_lock().collect()
    }

    fn reset(&mut self) -> StageResult<()> {
        self.wait_idle();
        self.pipeline.blocking_lock().reset()
    }

    fn add_main_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()> {
        self.wait_idle();
        self.pipeline.blocking_lock().add_main_stage(stage)
    }

    fn add_final_stage(&mut self, stage: Box<dyn Stage>) -> StageResult<()> {
        self.wait_idle();
        self.pipeline.blocking_lock().add_final_stage(stage)
    }

    fn to_config(&self) -> StageResult<PipelineConfig> {
        self.pipeline.blocking_lock().to_config()
    }

    fn metrics(&self) -> (usize, usize, usize) {
        self.pipeline.blocking_lock().metrics_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq_interface::{AXIS_REPETITION, AXIS_SAMPLE, AXIS_SEGMENT};
    use crate::processing::reduce::{ReduceStage, Reduction};
    use ndarray::Array3;
    use std::time::{Duration, Instant};

    fn packet(rep_offset: usize, reps: usize) -> DataPacket {
        let data = Array3::from_shape_fn((reps, 4, 32), |(r, s, n)| {
            ((rep_offset + r) * 128 + s * 32 + n) as f64
        })
        .into_dyn();
        DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE],
            vec![("ch0".into(), data)],
            vec![1e9],
        )
        .unwrap()
    }

    fn configure(processor: &mut dyn Processor) {
        processor
            .add_main_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_SAMPLE)))
            .unwrap();
        processor
            .add_final_stage(Box::new(ReduceStage::new(Reduction::Mean, AXIS_REPETITION)))
            .unwrap();
    }

    fn poll_ready(processor: &dyn Processor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !processor.ready() {
            assert!(Instant::now() < deadline, "processor never became ready");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn host_and_device_backends_agree() {
        let mut host = HostProcessor::new("host");
        let mut device = DeviceProcessor::new("device").unwrap();
        configure(&mut host);
        configure(&mut device);

        for processor in [&mut host as &mut dyn Processor, &mut device] {
            processor.push(packet(0, 3)).unwrap();
            processor.push(packet(3, 5)).unwrap();
        }
        let host_result = host.collect().unwrap().unwrap();
        poll_ready(&device);
        let device_result = device.collect().unwrap().unwrap();

        assert_eq!(host_result.axes, device_result.axes);
        assert!(!device_result.channels[0].data.is_device());
        assert_eq!(
            host_result.channels[0].data.to_host(),
            device_result.channels[0].data.to_host()
        );
    }

    #[test]
    fn device_processor_reports_ready_after_draining() {
        let mut device = DeviceProcessor::new("device").unwrap();
        configure(&mut device);
        device.push(packet(0, 2)).unwrap();
        poll_ready(&device);
        let result = device.collect().unwrap().unwrap();
        assert_eq!(result.axes, vec![AXIS_SEGMENT]);
        let (packets, collects, errors) = device.metrics();
        assert_eq!(packets, 1);
        assert_eq!(collects, 1);
        assert_eq!(errors, 0);
    }

    #[test]
    fn background_stage_errors_surface_on_collect() {
        let mut device = DeviceProcessor::new("device").unwrap();
        // Rename with the wrong arity fails on every packet
        device
            .add_main_stage(Box::new(crate::processing::channels::RenameStage::new(
                vec!["a".into(), "b".into()],
            )))
            .unwrap();
        device.push(packet(0, 2)).unwrap();
        let err = device.collect().unwrap_err();
        assert!(matches!(err, StageError::Config(_)));
    }

    #[test]
    fn collect_drains_packets_pushed_while_busy() {
        let mut device = DeviceProcessor::new("device").unwrap();
        configure(&mut device);
        for chunk in 0..4 {
            device.push(packet(chunk * 2, 2)).unwrap();
        }
        let result = device.collect().unwrap().unwrap();
        // all four pushes contribute: 8 repetitions averaged to one row
        assert_eq!(result.channels[0].data.shape(), &[4]);
    }
}
