use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::prelude::{StageError, StageResult};

/// Window function applied to the sinc kernel during filter design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Rectangular,
    Hann,
    Hamming,
    Blackman,
}

impl Default for WindowKind {
    fn default() -> Self {
        WindowKind::Hamming
    }
}

impl WindowKind {
    /// Window value at tap `n` of an `m`-tap kernel.
    pub fn value(self, n: usize, m: usize) -> f64 {
        if m < 2 {
            return 1.0;
        }
        let x = n as f64 / (m - 1) as f64;
        match self {
            WindowKind::Rectangular => 1.0,
            WindowKind::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
            WindowKind::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
            WindowKind::Blackman => {
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Windowed-sinc FIR design.
///
/// The lowpass kernel is normalized to unity DC gain; a highpass kernel is
/// the unit impulse at the center tap minus the lowpass, which requires an
/// odd tap count.
pub fn design_fir(
    kind: FilterKind,
    taps: usize,
    cutoff: f64,
    sample_rate: f64,
    window: WindowKind,
) -> StageResult<Array1<f64>> {
    if taps == 0 {
        return Err(StageError::Config("filter design needs taps >= 1".into()));
    }
    if !(sample_rate > 0.0) {
        return Err(StageError::Config(format!(
            "filter design needs a positive sample rate, got {sample_rate}"
        )));
    }
    if !(cutoff > 0.0) || cutoff >= sample_rate / 2.0 {
        return Err(StageError::Config(format!(
            "cutoff {cutoff} outside (0, {}) for sample rate {sample_rate}",
            sample_rate / 2.0
        )));
    }
    if kind == FilterKind::Highpass && taps % 2 == 0 {
        return Err(StageError::Config(
            "high-pass design requires an odd tap count".into(),
        ));
    }

    let fc = cutoff / sample_rate;
    let center = (taps - 1) as f64 / 2.0;
    let mut coeffs = Array1::from_shape_fn(taps, |n| {
        2.0 * fc * sinc(2.0 * fc * (n as f64 - center)) * window.value(n, taps)
    });
    let sum = coeffs.sum();
    if sum != 0.0 {
        coeffs.mapv_inplace(|c| c / sum);
    }

    if kind == FilterKind::Highpass {
        coeffs.mapv_inplace(|c| -c);
        coeffs[(taps - 1) / 2] += 1.0;
    }
    Ok(coeffs)
}
