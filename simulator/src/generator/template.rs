use std::f64::consts::TAU;

/// Sine carrier value at sample `n` for the given tone and sample rate.
pub fn carrier(n: usize, frequency: f64, sample_rate: f64) -> f64 {
    (TAU * frequency * n as f64 / sample_rate).sin()
}
