pub mod convolve;
pub mod fft;
pub mod window;

pub use convolve::convolve_same;
pub use fft::FftHelper;
pub use window::{design_fir, FilterKind, WindowKind};
