pub mod engine;
pub mod processor;

pub use engine::Pipeline;
pub use processor::{DeviceProcessor, HostProcessor, Processor};
