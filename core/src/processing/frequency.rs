use ndarray::{Array1, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::f64::consts::TAU;

use crate::daq_interface::{Channel, DataPacket, Tensor, AXIS_SAMPLE};
use crate::math::convolve::convolve_same;
use crate::math::window::{design_fir, FilterKind, WindowKind};
use crate::prelude::{Stage, StageError, StageResult};

/// Cache key for derived FIR coefficient vectors.
///
/// Floating-point parameters are keyed by their bit patterns so the key is
/// `Eq + Hash`; a recompute happens exactly when shape, rate or parameters
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CoeffKey {
    taps: usize,
    rate_bits: u64,
    cutoff_bits: u64,
    kind: FilterKind,
    window: WindowKind,
}

fn cached_coeffs<'a>(
    cache: &'a mut HashMap<CoeffKey, Vec<f64>>,
    kind: FilterKind,
    taps: usize,
    cutoff: f64,
    sample_rate: f64,
    window: WindowKind,
) -> StageResult<&'a Vec<f64>> {
    let key = CoeffKey {
        taps,
        rate_bits: sample_rate.to_bits(),
        cutoff_bits: cutoff.to_bits(),
        kind,
        window,
    };
    match cache.entry(key) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let coeffs = design_fir(kind, taps, cutoff, sample_rate, window)?.to_vec();
            Ok(entry.insert(coeffs))
        }
    }
}

fn sample_axis_for(stage: &'static str, packet: &DataPacket) -> StageResult<usize> {
    packet.axis_index(AXIS_SAMPLE).ok_or_else(|| {
        StageError::Shape(format!(
            "{stage} stage: packet has no `{AXIS_SAMPLE}` axis"
        ))
    })
}

fn check_slot_count(stage: &'static str, configured: usize, packet: &DataPacket) -> StageResult<()> {
    if configured != packet.channels.len() {
        return Err(StageError::Config(format!(
            "{stage} stage configures {configured} channel slots but the packet has {}",
            packet.channels.len()
        )));
    }
    if packet.aux.sample_rates.len() != packet.channels.len() {
        return Err(StageError::Config(format!(
            "{stage} stage: sample_rates has {} entries for {} channels",
            packet.aux.sample_rates.len(),
            packet.channels.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Digital down-conversion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdcConfig {
    /// One carrier frequency per channel slot; `null` passes the slot through.
    pub frequencies: Vec<Option<f64>>,
}

struct PhasorTable {
    cos: Array1<f64>,
    sin: Array1<f64>,
}

impl PhasorTable {
    fn build(samples: usize, sample_rate: f64, frequency: f64) -> Self {
        let step = TAU * frequency / sample_rate;
        Self {
            cos: Array1::from_shape_fn(samples, |n| (step * n as f64).cos()),
            sin: Array1::from_shape_fn(samples, |n| (step * n as f64).sin()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PhasorKey {
    samples: usize,
    rate_bits: u64,
    freq_bits: u64,
}

/// Splits each selected channel into in-phase/quadrature components by
/// multiplication with cached reference sinusoids along the sample axis.
pub struct DdcStage {
    config: DdcConfig,
    cache: HashMap<PhasorKey, PhasorTable>,
}

impl DdcStage {
    pub fn new(frequencies: Vec<Option<f64>>) -> Self {
        Self {
            config: DdcConfig { frequencies },
            cache: HashMap::new(),
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: DdcConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("Ddc stage parameters: {err}")))?;
        Ok(Self {
            config,
            cache: HashMap::new(),
        })
    }

    fn table(&mut self, samples: usize, sample_rate: f64, frequency: f64) -> &PhasorTable {
        let key = PhasorKey {
            samples,
            rate_bits: sample_rate.to_bits(),
            freq_bits: frequency.to_bits(),
        };
        self.cache
            .entry(key)
            .or_insert_with(|| PhasorTable::build(samples, sample_rate, frequency))
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Stage for DdcStage {
    fn type_name(&self) -> &'static str {
        "Ddc"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        let sample_axis = sample_axis_for("Ddc", &packet)?;
        check_slot_count("Ddc", self.config.frequencies.len(), &packet)?;

        let ndim = packet.axes.len();
        let old_channels = std::mem::take(&mut packet.channels);
        let old_rates = std::mem::take(&mut packet.aux.sample_rates);
        let mut channels = Vec::with_capacity(old_channels.len());
        let mut rates = Vec::with_capacity(old_rates.len());

        for (slot, (channel, rate)) in old_channels.into_iter().zip(old_rates).enumerate() {
            let Some(frequency) = self.config.frequencies[slot] else {
                channels.push(channel);
                rates.push(rate);
                continue;
            };

            let samples = channel.data.shape()[sample_axis];
            let table = self.table(samples, rate, frequency);

            let mut broadcast_shape = vec![1; ndim];
            broadcast_shape[sample_axis] = samples;
            let cos_ref = table
                .cos
                .view()
                .into_shape(IxDyn(&broadcast_shape))
                .map_err(|err| StageError::Internal(err.to_string()))?;
            let sin_ref = table
                .sin
                .view()
                .into_shape(IxDyn(&broadcast_shape))
                .map_err(|err| StageError::Internal(err.to_string()))?;

            let data = channel.data.view();
            let in_phase = (&data * &cos_ref) * 2.0;
            let quadrature = (&data * &sin_ref) * 2.0;

            channels.push(Channel::new(
                format!("{}_I", channel.name),
                Tensor::from_host(in_phase),
            ));
            channels.push(Channel::new(
                format!("{}_Q", channel.name),
                Tensor::from_host(quadrature),
            ));
            // the split pair shares one physical input, so its rate entry is
            // duplicated to keep channels and sample_rates 1:1
            rates.push(rate);
            rates.push(rate);
        }

        packet.channels = channels;
        packet.aux.sample_rates = rates;
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FIR filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirSettings {
    pub kind: FilterKind,
    pub taps: usize,
    pub cutoff: f64,
    #[serde(default)]
    pub window: WindowKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirFilterConfig {
    /// One filter per channel slot; `null` passes the slot through.
    pub filters: Vec<Option<FirSettings>>,
}

/// Convolves selected channels with a cached windowed-sinc kernel along the
/// sample axis, preserving shape.
pub struct FirFilterStage {
    config: FirFilterConfig,
    cache: HashMap<CoeffKey, Vec<f64>>,
}

impl FirFilterStage {
    pub fn new(filters: Vec<Option<FirSettings>>) -> Self {
        Self {
            config: FirFilterConfig { filters },
            cache: HashMap::new(),
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: FirFilterConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("FirFilter stage parameters: {err}")))?;
        Ok(Self {
            config,
            cache: HashMap::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Stage for FirFilterStage {
    fn type_name(&self) -> &'static str {
        "FirFilter"
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        let sample_axis = sample_axis_for("FirFilter", &packet)?;
        check_slot_count("FirFilter", self.config.filters.len(), &packet)?;

        for (slot, channel) in packet.channels.iter_mut().enumerate() {
            let Some(settings) = self.config.filters[slot].clone() else {
                continue;
            };
            let rate = packet.aux.sample_rates[slot];
            let coeffs = cached_coeffs(
                &mut self.cache,
                settings.kind,
                settings.taps,
                settings.cutoff,
                rate,
                settings.window,
            )?;

            let view = channel.data.view();
            let mut filtered = view.to_owned();
            for (lane, mut out_lane) in view
                .lanes(Axis(sample_axis))
                .into_iter()
                .zip(filtered.lanes_mut(Axis(sample_axis)))
            {
                let sequence: Vec<f64> = lane.iter().copied().collect();
                for (dst, value) in out_lane
                    .iter_mut()
                    .zip(convolve_same(&sequence, coeffs))
                {
                    *dst = value;
                }
            }
            channel.data = Tensor::from_host(filtered);
        }
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Matched-filter readout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedSettings {
    pub kind: FilterKind,
    pub cutoff: f64,
    #[serde(default)]
    pub window: WindowKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedFilterConfig {
    /// One weight design per channel; every channel participates so ranks
    /// stay uniform within the packet.
    pub filters: Vec<MatchedSettings>,
}

/// Weighted-integration readout: designs a kernel sized to the sample
/// extent and collapses the sample axis to `sum(data × coefficients)`,
/// one value per remaining index.
pub struct MatchedFilterStage {
    config: MatchedFilterConfig,
    cache: HashMap<CoeffKey, Vec<f64>>,
}

impl MatchedFilterStage {
    pub fn new(filters: Vec<MatchedSettings>) -> Self {
        Self {
            config: MatchedFilterConfig { filters },
            cache: HashMap::new(),
        }
    }

    pub fn from_params(params: serde_json::Value) -> StageResult<Self> {
        let config: MatchedFilterConfig = serde_json::from_value(params)
            .map_err(|err| StageError::Config(format!("MatchedFilter stage parameters: {err}")))?;
        Ok(Self {
            config,
            cache: HashMap::new(),
        })
    }
}

impl Stage for MatchedFilterStage {
    fn type_name(&self) -> &'static str {
        "MatchedFilter"
    }

    fn reduces_axis(&self) -> Option<&str> {
        Some(AXIS_SAMPLE)
    }

    fn process(&mut self, mut packet: DataPacket) -> StageResult<DataPacket> {
        let sample_axis = sample_axis_for("MatchedFilter", &packet)?;
        check_slot_count("MatchedFilter", self.config.filters.len(), &packet)?;

        for (slot, channel) in packet.channels.iter_mut().enumerate() {
            let settings = self.config.filters[slot].clone();
            let rate = packet.aux.sample_rates[slot];
            let taps = channel.data.shape()[sample_axis];
            let coeffs = cached_coeffs(
                &mut self.cache,
                settings.kind,
                taps,
                settings.cutoff,
                rate,
                settings.window,
            )?;

            let reduced = channel.data.view().map_axis(Axis(sample_axis), |lane| {
                lane.iter().zip(coeffs.iter()).map(|(&x, &w)| x * w).sum::<f64>()
            });
            channel.data = Tensor::from_host(reduced);
        }
        packet.axes.remove(sample_axis);
        Ok(packet)
    }

    fn to_params(&self) -> StageResult<serde_json::Value> {
        serde_json::to_value(&self.config).map_err(|err| StageError::Internal(err.to_string()))
    }
}
