pub mod packet;
pub mod tensor;

pub use packet::{AuxData, Channel, DataPacket, AXIS_REPETITION, AXIS_SAMPLE, AXIS_SEGMENT};
pub use tensor::{DeviceTensor, Tensor};
