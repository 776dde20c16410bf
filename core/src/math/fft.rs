use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};

/// Helper that wraps the `rustfft` planner for reuse.
pub struct FftHelper {
    forward: std::sync::Arc<dyn Fft<f64>>,
    inverse: std::sync::Arc<dyn Fft<f64>>,
    len: usize,
}

impl FftHelper {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        Self {
            forward,
            inverse,
            len,
        }
    }

    /// Forward transform of a real sequence, zero-padded to the plan length.
    pub fn forward(&self, input: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input
            .iter()
            .map(|&value| Complex64::new(value, 0.0))
            .collect();
        buffer.resize(self.len, Complex64::zero());
        self.forward.process(&mut buffer);
        buffer
    }

    /// Inverse transform returning the real part, scaled by 1/len.
    pub fn inverse_real(&self, spectrum: &mut [Complex64]) -> Vec<f64> {
        self.inverse.process(spectrum);
        let scale = 1.0 / self.len as f64;
        spectrum.iter().map(|c| c.re * scale).collect()
    }
}

/// Full linear convolution of two real sequences via zero-padded FFTs.
pub fn fft_convolve(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    if signal.is_empty() || kernel.is_empty() {
        return Vec::new();
    }
    let full = signal.len() + kernel.len() - 1;
    let helper = FftHelper::new(full.next_power_of_two());
    let mut a = helper.forward(signal);
    let b = helper.forward(kernel);
    for (x, y) in a.iter_mut().zip(&b) {
        *x *= *y;
    }
    let mut time = helper.inverse_real(&mut a);
    time.truncate(full);
    time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_returns_plan_length() {
        let helper = FftHelper::new(8);
        let output = helper.forward(&[1.0, 0.0, -1.0, 0.0]);
        assert_eq!(output.len(), 8);
    }

    #[test]
    fn fft_convolve_matches_direct_product() {
        let signal = [1.0, 2.0, 3.0, 4.0];
        let kernel = [0.5, -0.5];
        let full = fft_convolve(&signal, &kernel);
        let expected = [0.5, 0.5, 0.5, 0.5, -2.0];
        assert_eq!(full.len(), expected.len());
        for (got, want) in full.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }
    }
}
