use anyhow::Context;
use daqcore::daq_interface::{DataPacket, AXIS_REPETITION, AXIS_SAMPLE, AXIS_SEGMENT};
use ndarray::Array3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::generator::template::carrier;

/// Configuration for generating synthetic acquisition packets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub repetitions: usize,
    pub segments: usize,
    pub samples: usize,
    pub channels: usize,
    pub sample_rate: f64,
    pub frequency: f64,
    pub noise: f64,
    pub seed: u64,
    /// How many partial pushes the repetitions are split across.
    pub pushes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            repetitions: 32,
            segments: 4,
            samples: 1024,
            channels: 1,
            sample_rate: 1.0e9,
            frequency: 5.0e7,
            noise: 0.03,
            seed: 0,
            pushes: 4,
        }
    }
}

fn build_packet(
    config: &GeneratorConfig,
    rep_offset: usize,
    repetitions: usize,
    rng: &mut StdRng,
) -> anyhow::Result<DataPacket> {
    let mut channels = Vec::with_capacity(config.channels);
    for channel_index in 0..config.channels {
        let data = Array3::from_shape_fn(
            (repetitions, config.segments, config.samples),
            |(r, s, n)| {
                let envelope = 1.0 + 0.1 * (rep_offset + r) as f64 + 0.25 * s as f64;
                let tone = carrier(n, config.frequency, config.sample_rate);
                let jitter = if config.noise > 0.0 {
                    rng.gen_range(-config.noise..config.noise)
                } else {
                    0.0
                };
                tone * envelope + 0.05 * channel_index as f64 + jitter
            },
        )
        .into_dyn();
        channels.push((format!("ch{channel_index}"), data));
    }
    let sample_rates = vec![config.sample_rate; config.channels];
    let packet = DataPacket::from_arrays(
        &[AXIS_REPETITION, AXIS_SEGMENT, AXIS_SAMPLE],
        channels,
        sample_rates,
    )?;
    Ok(packet)
}

/// Splits the configured repetitions across the configured pushes.
pub fn build_packets(config: &GeneratorConfig) -> anyhow::Result<Vec<DataPacket>> {
    if config.pushes == 0 {
        anyhow::bail!("generator needs at least one push");
    }
    if config.repetitions < config.pushes {
        anyhow::bail!(
            "generator cannot split {} repetitions across {} pushes",
            config.repetitions,
            config.pushes
        );
    }
    config
        .repetitions
        .checked_mul(config.segments)
        .and_then(|v| v.checked_mul(config.samples))
        .context("overflow computing sample count for generator")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let base = config.repetitions / config.pushes;
    let remainder = config.repetitions % config.pushes;
    let mut packets = Vec::with_capacity(config.pushes);
    let mut rep_offset = 0;
    for push in 0..config.pushes {
        let repetitions = base + usize::from(push < remainder);
        packets.push(build_packet(config, rep_offset, repetitions, &mut rng)?);
        rep_offset += repetitions;
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_splits_repetitions_across_pushes() {
        let config = GeneratorConfig {
            repetitions: 10,
            segments: 2,
            samples: 16,
            channels: 2,
            pushes: 3,
            ..Default::default()
        };
        let packets = build_packets(&config).unwrap();
        assert_eq!(packets.len(), 3);
        let total: usize = packets
            .iter()
            .map(|p| p.channels[0].data.shape()[0])
            .sum();
        assert_eq!(total, 10);
        for packet in &packets {
            assert_eq!(packet.channels.len(), 2);
            assert_eq!(packet.aux.sample_rates.len(), 2);
            assert_eq!(&packet.channels[0].data.shape()[1..], &[2, 16]);
        }
    }

    #[test]
    fn generator_rejects_more_pushes_than_repetitions() {
        let config = GeneratorConfig {
            repetitions: 2,
            pushes: 3,
            ..Default::default()
        };
        assert!(build_packets(&config).is_err());
    }

    #[test]
    fn generator_is_deterministic_for_a_fixed_seed() {
        let config = GeneratorConfig {
            repetitions: 4,
            segments: 2,
            samples: 32,
            pushes: 2,
            seed: 13,
            ..Default::default()
        };
        let a = build_packets(&config).unwrap();
        let b = build_packets(&config).unwrap();
        assert_eq!(
            a[1].channels[0].data.to_host(),
            b[1].channels[0].data.to_host()
        );
    }
}
