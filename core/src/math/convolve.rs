use crate::math::fft::fft_convolve;

/// Kernels longer than this go through the FFT path.
const FFT_TAP_THRESHOLD: usize = 64;

/// Edge-padded 1-D convolution with "same"-length output.
///
/// The signal is padded with replicated edge values so the result keeps the
/// input length. Direct and FFT paths produce identical results up to
/// floating-point rounding.
pub fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    if signal.is_empty() || kernel.is_empty() {
        return signal.to_vec();
    }
    let k = kernel.len();
    let pad_left = (k - 1) / 2;
    let pad_right = k / 2;

    let mut padded = Vec::with_capacity(signal.len() + k - 1);
    padded.extend(std::iter::repeat(signal[0]).take(pad_left));
    padded.extend_from_slice(signal);
    padded.extend(std::iter::repeat(signal[signal.len() - 1]).take(pad_right));

    if k > FFT_TAP_THRESHOLD {
        let full = fft_convolve(&padded, kernel);
        full[k - 1..k - 1 + signal.len()].to_vec()
    } else {
        direct_valid(&padded, kernel, signal.len())
    }
}

fn direct_valid(padded: &[f64], kernel: &[f64], out_len: usize) -> Vec<f64> {
    let k = kernel.len();
    (0..out_len)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(j, &h)| padded[i + k - 1 - j] * h)
                .sum()
        })
        .collect()
}
