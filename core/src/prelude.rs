use crate::daq_interface::DataPacket;

/// Common error type for pipeline and stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown stage type `{0}`")]
    UnknownStage(String),
    #[error("shape error: {0}")]
    Shape(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing one unit of packet computation.
///
/// A stage consumes a packet and returns the transformed packet. Stages are
/// stateless across calls except for internal derived-kernel caches, and are
/// owned by exactly one pipeline.
pub trait Stage: Send {
    /// Registered type name used by the configuration (de)serializer.
    fn type_name(&self) -> &'static str;

    fn process(&mut self, packet: DataPacket) -> StageResult<DataPacket>;

    /// Axis this stage collapses, if any. Used to validate stage placement:
    /// a stage reducing `repetition` must never run as a main stage.
    fn reduces_axis(&self) -> Option<&str> {
        None
    }

    /// Stage-specific parameters as a JSON object, without the `type` tag.
    fn to_params(&self) -> StageResult<serde_json::Value>;
}
