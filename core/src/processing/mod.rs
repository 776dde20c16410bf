pub mod arithmetic;
pub mod channels;
pub mod frequency;
pub mod reduce;

pub use arithmetic::{ChannelArithmeticStage, ConstantArithmeticStage, Op};
pub use channels::{
    AmplitudePhaseStage, ClusterStage, DuplicateStage, RenameStage, SliceStage,
};
pub use frequency::{DdcStage, FirFilterStage, MatchedFilterStage};
pub use reduce::{ReduceStage, Reduction};
