use anyhow::Result;
use daqcore::{DataPacket, Processor, Stage};

/// Acquisition HAL facade embedding the post-processing pipeline.
///
/// The real instrument driver sits where [`AcquisitionHal::push_packet`] is
/// called from; everything else is the pipeline surface the rest of the
/// toolkit programs against.
pub struct AcquisitionHal {
    processor: Box<dyn Processor>,
}

impl AcquisitionHal {
    pub fn new(processor: Box<dyn Processor>) -> Self {
        Self { processor }
    }

    /// Replaces the installed processor, dropping any unprocessed data.
    pub fn set_data_processor(&mut self, processor: Box<dyn Processor>) {
        self.processor = processor;
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    pub fn reset_pipeline(&mut self) -> Result<()> {
        Ok(self.processor.reset()?)
    }

    /// Appends a main stage (runs on every pushed packet).
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> Result<()> {
        Ok(self.processor.add_main_stage(stage)?)
    }

    /// Appends a final stage (runs once on the collected dataset).
    pub fn add_stage_end(&mut self, stage: Box<dyn Stage>) -> Result<()> {
        Ok(self.processor.add_final_stage(stage)?)
    }

    pub fn push_packet(&mut self, packet: DataPacket) -> Result<()> {
        Ok(self.processor.push(packet)?)
    }

    pub fn ready(&self) -> bool {
        self.processor.ready()
    }

    pub fn collect_data(&mut self) -> Result<Option<DataPacket>> {
        Ok(self.processor.collect()?)
    }
}
