//! Post-processing core for the Rust laboratory acquisition platform.
//!
//! The modules implement the acquisition post-processing pipeline: ordered
//! transformation stages over repetition/segment/sample datasets, with a
//! host-memory and a device-memory execution backend behind one contract.

pub mod backend;
pub mod config;
pub mod daq_interface;
pub mod math;
pub mod pipeline;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use daq_interface::{AuxData, Channel, DataPacket, Tensor};
pub use pipeline::{DeviceProcessor, HostProcessor, Pipeline, Processor};
pub use prelude::{Stage, StageError, StageResult};
