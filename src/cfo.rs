use crate::config::RxConfig;
use crate::error::RxError;
use crate::preamble::{FFT_LEN, LTS_GI_LEN, PREAMBLE_LEN, STS_LEN, STS_PERIOD};
use num::Complex;
use std::f64::consts::PI;

/// Carrier frequency offset of one packet
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyOffsetEstimate {
    /// From the short training field, in Hz. Unambiguous up to ±sample_rate / 32
    pub coarse_hz: f64,
    /// Residual left after coarse correction, from the long training field, in Hz
    pub fine_hz: f64,
    /// Total phase advance per sample in radians. Correction rotates the other way
    pub phase_rotation_per_sample: f64,
}

impl FrequencyOffsetEstimate {
    pub fn offset_hz(&self) -> f64 {
        self.coarse_hz + self.fine_hz
    }
}

fn to_hz(rad_per_samp: f64, sample_rate: f64) -> f64 {
    rad_per_samp * sample_rate / (2. * PI)
}

/// Lag-`lag` autocorrelation over `range`, with the second sample of each pair pre-rotated by
/// `-rot` radians per sample
fn lagged_corr(
    samps: &[Complex<f32>],
    range: std::ops::Range<usize>,
    lag: usize,
    rot: f64,
) -> Complex<f64> {
    let corr = Complex::from_polar(&1., &(-rot * lag as f64));
    range
        .map(|i| {
            let (a, b) = (samps[i], samps[i + lag]);
            Complex::new(a.re as f64, -a.im as f64) * Complex::new(b.re as f64, b.im as f64)
        })
        .sum::<Complex<f64>>()
        * corr
}

/// Estimate the CFO of a packet whose short training field starts at `start`. The coarse estimate
/// skips the first short period, which the receiver's gain control may distort. The fine estimate
/// compares the two long training symbols after coarse correction.
pub fn estimate_cfo(
    samps: &[Complex<f32>],
    start: usize,
    config: &RxConfig,
) -> Result<FrequencyOffsetEstimate, RxError> {
    if start + PREAMBLE_LEN > samps.len() {
        return Err(RxError::Truncated {
            start,
            needed: start + PREAMBLE_LEN,
            available: samps.len(),
        });
    }
    let power = samps[start..start + PREAMBLE_LEN]
        .iter()
        .map(|x| x.norm_sqr())
        .sum::<f32>()
        / PREAMBLE_LEN as f32;
    if !(power >= config.min_energy) {
        return Err(RxError::DegenerateSignal { start, power });
    }

    let coarse = lagged_corr(
        samps,
        start + STS_PERIOD..start + STS_LEN - 2 * STS_PERIOD,
        STS_PERIOD,
        0.,
    )
    .arg()
        / STS_PERIOD as f64;

    // Skip the first 8 samples of the guard interval, which may still hold short field energy
    let lts_start = start + STS_LEN + LTS_GI_LEN / 4;
    let fine = lagged_corr(
        samps,
        lts_start..lts_start + FFT_LEN + LTS_GI_LEN / 2,
        FFT_LEN,
        coarse,
    )
    .arg()
        / FFT_LEN as f64;

    Ok(FrequencyOffsetEstimate {
        coarse_hz: to_hz(coarse, config.sample_rate),
        fine_hz: to_hz(fine, config.sample_rate),
        phase_rotation_per_sample: coarse + fine,
    })
}

/// Take a buffer and CFO estimate (in radians per sample) and correct the samples for the CFO.
/// `offset` is the index of `samps[0]` relative to the sample where the correction phase is zero,
/// so that separate windows of one packet share the same phase reference.
pub fn correct_cfo(samps: &[Complex<f32>], cfo: f64, offset: usize) -> Vec<Complex<f32>> {
    samps
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let phase = -cfo * (offset + i) as f64;
            s * Complex::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect()
}
