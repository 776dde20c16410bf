pub mod acquisition;

pub use acquisition::AcquisitionHal;
