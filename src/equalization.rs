use crate::preamble::{TrainingReference, FFT_LEN};
use crate::subcarriers::{fft_bin, pilot_values, DATA_SUBCARRIERS, PILOT_SUBCARRIERS};
use num::{Complex, Zero};
use rustfft::{FFTplanner, FFT};
use std::f32::consts::PI;
use std::sync::Arc;

/// Forward 64-point FFT scaled by 1/64, so that a subcarrier carrying `x` at the transmitter comes
/// out as `H * x`
pub struct SymbolFft {
    fft: Arc<dyn FFT<f32>>,
}

impl SymbolFft {
    pub fn new() -> Self {
        let mut planner = FFTplanner::new(false);
        Self {
            fft: planner.plan_fft(FFT_LEN),
        }
    }

    pub fn transform(&self, samps: &[Complex<f32>]) -> Vec<Complex<f32>> {
        assert_eq!(samps.len(), FFT_LEN);
        let mut input = samps.to_vec();
        let mut output = vec![Complex::zero(); FFT_LEN];
        self.fft.process(&mut input, &mut output);
        output.iter().map(|x| *x / FFT_LEN as f32).collect()
    }
}

impl Default for SymbolFft {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-subcarrier channel gains of one packet, indexed by FFT bin. Unused bins are zero.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEstimate {
    gains: Vec<Complex<f32>>,
    /// Noise power per subcarrier, in the same units as the gains
    noise_power: f32,
}

impl ChannelEstimate {
    pub fn from_gains(gains: Vec<Complex<f32>>, noise_power: f32) -> Self {
        assert_eq!(gains.len(), FFT_LEN);
        Self { gains, noise_power }
    }

    /// Gain of subcarrier `k` (-32..32)
    pub fn gain(&self, k: i32) -> Complex<f32> {
        self.gains[fft_bin(k)]
    }

    pub fn noise_power(&self) -> f32 {
        self.noise_power
    }

    /// Noise variance of subcarrier `k` after zero-forcing, never below `floor`. Infinite for a
    /// subcarrier with no gain, which makes its soft bits erasures
    pub fn equalized_noise_var(&self, k: i32, floor: f32) -> f32 {
        let g = self.gain(k).norm_sqr();
        if g <= 0. {
            return std::f32::INFINITY;
        }
        (self.noise_power / g).max(floor)
    }
}

/// Estimate the channel from the two long training symbols (64 samples each, CFO corrected).
/// Averaging the two halves the noise, and their difference measures it.
pub fn estimate_channel(
    t1: &[Complex<f32>],
    t2: &[Complex<f32>],
    reference: &TrainingReference,
    fft: &SymbolFft,
) -> ChannelEstimate {
    let (y1, y2) = (fft.transform(t1), fft.transform(t2));

    let mut gains = vec![Complex::zero(); FFT_LEN];
    let mut noise = 0.;
    let mut used = 0;
    for (bin, tone) in reference.lts_tones.iter().enumerate() {
        if *tone == 0. {
            continue;
        }
        gains[bin] = (y1[bin] + y2[bin]) / (2. * tone);
        noise += (y1[bin] - y2[bin]).norm_sqr() / 2.;
        used += 1;
    }
    ChannelEstimate {
        gains,
        noise_power: noise / used as f32,
    }
}

/// FFT a 64 sample symbol and zero-force it with the channel estimate. Returns all 64 bins
/// (unused bins are zero)
pub fn equalize_symbol(
    samps: &[Complex<f32>],
    channel: &ChannelEstimate,
    fft: &SymbolFft,
) -> Vec<Complex<f32>> {
    fft.transform(samps)
        .iter()
        .zip(&channel.gains)
        .map(|(y, h)| if h.is_zero() { Complex::zero() } else { y / h })
        .collect()
}

/// Residual phase of an equalized symbol, modeled as `theta + slope * k` on subcarrier `k`. The
/// constant part is what's left of the CFO, the slope is the sampling time offset. Both
/// accumulate over a packet, so the receiver carries the last symbol's track into the next.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PilotPhaseTrack {
    pub theta: f32,
    pub slope: f32,
}

impl PilotPhaseTrack {
    /// Multiplier that removes the tracked phase from subcarrier `k`
    pub fn correction(&self, k: i32) -> Complex<f32> {
        Complex::from_polar(&1., &-(self.theta + self.slope * k as f32))
    }

    /// Sampling time offset implied by the slope, in samples. Positive when symbols arrive
    /// earlier than the FFT window expects
    pub fn timing_offset(&self) -> f32 {
        self.slope * FFT_LEN as f32 / (2. * PI)
    }

    /// Account for the FFT window moving `samples` later (earlier if negative)
    pub fn shift_window(&mut self, samples: isize) {
        self.slope += 2. * PI * samples as f32 / FFT_LEN as f32;
    }
}

/// Track the pilots of an equalized symbol, starting from `previous` (the previous symbol's
/// track, or the default for the first one). Only the change since `previous` is measured: the
/// pilots are derotated by it, and a phase line is fitted through what's left. Those residuals
/// are small, so they never straddle the ±pi cut even when the accumulated slope wraps the outer
/// pilots many times over. With `max_ratio_combining` each pilot is weighted by its channel
/// magnitude.
pub fn track_pilots(
    eq: &[Complex<f32>],
    symbol_index: usize,
    channel: &ChannelEstimate,
    max_ratio_combining: bool,
    previous: &PilotPhaseTrack,
) -> PilotPhaseTrack {
    let expected = pilot_values(symbol_index);
    let mut weights = [1f32; 4];
    if max_ratio_combining {
        for (w, k) in weights.iter_mut().zip(PILOT_SUBCARRIERS.iter()) {
            *w = channel.gain(*k).norm();
        }
    }
    let total: f32 = weights.iter().sum();
    if !(total > 0.) {
        weights = [1.; 4];
    }
    let total: f32 = weights.iter().sum();
    for w in weights.iter_mut() {
        *w /= total;
    }

    let pilots: Vec<Complex<f32>> = PILOT_SUBCARRIERS
        .iter()
        .zip(expected.iter())
        .map(|(k, p)| eq[fft_bin(*k)] * *p * previous.correction(*k))
        .collect();
    let theta0 = pilots
        .iter()
        .zip(weights.iter())
        .map(|(d, w)| *d * *w)
        .sum::<Complex<f32>>()
        .arg();
    let rot = Complex::from_polar(&1., &-theta0);
    let phases: Vec<f32> = pilots.iter().map(|d| (d * rot).arg()).collect();

    // Weighted least squares line through (k, phase)
    let mut k_mean = 0.;
    let mut p_mean = 0.;
    for ((k, p), w) in PILOT_SUBCARRIERS.iter().zip(&phases).zip(weights.iter()) {
        k_mean += w * *k as f32;
        p_mean += w * p;
    }
    let (mut num, mut den) = (0., 0.);
    for ((k, p), w) in PILOT_SUBCARRIERS.iter().zip(&phases).zip(weights.iter()) {
        let dk = *k as f32 - k_mean;
        num += w * dk * (p - p_mean);
        den += w * dk * dk;
    }
    let slope = if den > 0. { num / den } else { 0. };

    let theta = previous.theta + theta0 + p_mean - slope * k_mean;
    PilotPhaseTrack {
        // Keep theta in (-pi, pi]
        theta: Complex::from_polar(&1f32, &theta).arg(),
        slope: previous.slope + slope,
    }
}

/// The 48 data subcarriers of an equalized symbol with the tracked phase removed
pub fn extract_data(eq: &[Complex<f32>], track: &PilotPhaseTrack) -> Vec<Complex<f32>> {
    DATA_SUBCARRIERS
        .iter()
        .map(|k| eq[fft_bin(*k)] * track.correction(*k))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use num::One;

    #[test]
    /// Little test to understand the conventions in rustfft
    fn understand_rustfft() {
        // A unit tone on subcarrier 5 comes out of the scaled forward transform as 1 in bin 5
        let samps: Vec<Complex<f32>> = (0..FFT_LEN)
            .map(|n| Complex::from_polar(&1., &(2. * std::f32::consts::PI * 5. * n as f32 / 64.)))
            .collect();
        let out = SymbolFft::new().transform(&samps);
        assert!((out[5] - Complex::one()).norm() < 1e-5);
        assert!(out[6].norm() < 1e-5);
    }

    /// Circularly convolve one period with the channel taps
    fn circular(symbol: &[Complex<f32>], taps: &[Complex<f32>]) -> Vec<Complex<f32>> {
        (0..symbol.len())
            .map(|n| {
                taps.iter()
                    .enumerate()
                    .map(|(i, t)| t * symbol[(n + symbol.len() - i) % symbol.len()])
                    .sum::<Complex<f32>>()
            })
            .collect()
    }

    #[test]
    fn test_channel_estimate_multipath() {
        let reference = TrainingReference::new();
        let fft = SymbolFft::new();
        let taps = [Complex::new(0.8, 0.1), Complex::zero(), Complex::new(0.2, -0.3)];
        let rx = circular(&reference.lts_symbol, &taps);
        let channel = estimate_channel(&rx, &rx, &reference, &fft);
        assert!(channel.noise_power() < 1e-9);

        let mut padded = taps.to_vec();
        padded.resize(FFT_LEN, Complex::zero());
        let response = fft.transform(&padded);
        for k in -26..=26 {
            if k == 0 {
                assert_eq!(channel.gain(k), Complex::zero());
                continue;
            }
            // `transform` divides by 64, the channel response doesn't
            let h = response[fft_bin(k)] * FFT_LEN as f32;
            assert!((channel.gain(k) - h).norm() < 1e-4, "{} {} {}", k, channel.gain(k), h);
        }
        assert_eq!(channel.gain(30), Complex::zero());
        assert_eq!(channel.equalized_noise_var(30, 1e-3), std::f32::INFINITY);
        assert_eq!(channel.equalized_noise_var(5, 1e-3), 1e-3);
    }

    #[test]
    fn test_noise_power_estimate() {
        let reference = TrainingReference::new();
        let fft = SymbolFft::new();
        // Same offset on every sample of T2 only: shows up in bin 0, which is unused
        let t2: Vec<_> = reference
            .lts_symbol
            .iter()
            .map(|x| x + Complex::new(1., 0.))
            .collect();
        let channel = estimate_channel(&reference.lts_symbol, &t2, &reference, &fft);
        assert!(channel.noise_power() < 1e-9);

        // A tone on subcarrier 1 in T2 only: |Y1 - Y2|^2 / 2 = 0.5 on one of 52 bins
        let t2: Vec<_> = reference
            .lts_symbol
            .iter()
            .enumerate()
            .map(|(n, x)| x + Complex::from_polar(&1., &(2. * std::f32::consts::PI * n as f32 / 64.)))
            .collect();
        let channel = estimate_channel(&reference.lts_symbol, &t2, &reference, &fft);
        assert!((channel.noise_power() - 0.5 / 52.).abs() < 1e-5);
    }

    fn flat_channel() -> ChannelEstimate {
        let reference = TrainingReference::new();
        let gains = reference
            .lts_tones
            .iter()
            .map(|t| if *t == 0. { Complex::zero() } else { Complex::one() })
            .collect();
        ChannelEstimate::from_gains(gains, 0.)
    }

    #[test]
    fn test_pilot_tracking() {
        let channel = flat_channel();
        for &(theta, slope) in [(0.3f32, 0.01f32), (-2.9, -0.02), (3.1, 0.)].iter() {
            for symbol_index in [1, 4, 77].iter() {
                // Equalized symbol with a known phase ramp on top of the ideal values
                let mut eq = vec![Complex::zero(); FFT_LEN];
                for (k, p) in PILOT_SUBCARRIERS.iter().zip(pilot_values(*symbol_index).iter()) {
                    eq[fft_bin(*k)] = Complex::from_polar(p, &(theta + slope * *k as f32));
                }
                for (i, k) in DATA_SUBCARRIERS.iter().enumerate() {
                    let x = if i % 3 == 0 { -1. } else { 1. };
                    eq[fft_bin(*k)] = Complex::from_polar(&x, &(theta + slope * *k as f32));
                }

                for mrc in [true, false].iter() {
                    let track = track_pilots(
                        &eq,
                        *symbol_index,
                        &channel,
                        *mrc,
                        &PilotPhaseTrack::default(),
                    );
                    assert!((track.slope - slope).abs() < 1e-4);
                    let dtheta = Complex::from_polar(&1f32, &(track.theta - theta)).arg();
                    assert!(dtheta.abs() < 1e-4, "{:?} {} {}", track, theta, slope);

                    let data = extract_data(&eq, &track);
                    for (i, d) in data.iter().enumerate() {
                        let x = if i % 3 == 0 { -1. } else { 1. };
                        assert!((d - Complex::new(x, 0.)).norm() < 1e-3);
                    }
                }
            }
        }
    }

    #[test]
    fn test_pilot_tracking_across_symbols() {
        let channel = flat_channel();
        // Three samples of timing drift and a residual CFO over 300 symbols. By the end the
        // outer pilots have wrapped around once and theta many times.
        let num_symbols = 300;
        let final_slope = 2. * PI * 3. / FFT_LEN as f32;
        let phase_at = |i: usize, k: i32| {
            let slope = final_slope * i as f32 / num_symbols as f32;
            (0.05 * i as f32 + slope * k as f32, slope)
        };
        let symbol = |i: usize| {
            let mut eq = vec![Complex::zero(); FFT_LEN];
            for (k, p) in PILOT_SUBCARRIERS.iter().zip(pilot_values(i).iter()) {
                eq[fft_bin(*k)] = Complex::from_polar(p, &phase_at(i, *k).0);
            }
            for k in DATA_SUBCARRIERS.iter() {
                eq[fft_bin(*k)] = Complex::from_polar(&1f32, &phase_at(i, *k).0);
            }
            eq
        };

        let mut track = PilotPhaseTrack::default();
        for i in 1..=num_symbols {
            let eq = symbol(i);
            track = track_pilots(&eq, i, &channel, true, &track);
            let slope = phase_at(i, 0).1;
            assert!((track.slope - slope).abs() < 1e-4, "symbol {}: {:?}", i, track);
            for d in extract_data(&eq, &track) {
                assert!((d - Complex::one()).norm() < 1e-3, "symbol {}: {}", i, d);
            }
        }
        assert!((track.timing_offset() - 3.).abs() < 1e-2);

        // Measured from scratch, the last symbol's pilots wrap and the fit is useless
        let fresh = track_pilots(
            &symbol(num_symbols),
            num_symbols,
            &channel,
            true,
            &PilotPhaseTrack::default(),
        );
        assert!((fresh.slope - final_slope).abs() > 0.1);
    }

    #[test]
    fn test_shift_window() {
        let reference = TrainingReference::new();
        let fft = SymbolFft::new();
        let channel = flat_channel();
        let tones = fft.transform(&reference.lts_symbol);
        // Starting the window one sample late rotates subcarrier k by 2 pi k / 64
        let mut late = reference.lts_symbol[1..].to_vec();
        late.push(reference.lts_symbol[0]);
        let shifted = fft.transform(&late);
        let mut track = PilotPhaseTrack::default();
        track.shift_window(1);
        assert!((track.timing_offset() - 1.).abs() < 1e-6);
        for k in PILOT_SUBCARRIERS.iter() {
            let expected = tones[fft_bin(*k)] / channel.gain(*k);
            let undone = shifted[fft_bin(*k)] * track.correction(*k);
            assert!((undone - expected).norm() < 1e-4, "{} {}", k, undone);
        }
    }

    #[test]
    fn test_equalize_symbol() {
        let reference = TrainingReference::new();
        let fft = SymbolFft::new();
        let taps = [Complex::new(0.5, 0.5), Complex::new(0.1, 0.)];
        let channel = estimate_channel(
            &circular(&reference.lts_symbol, &taps),
            &circular(&reference.lts_symbol, &taps),
            &reference,
            &fft,
        );
        // Equalizing the LTS itself gives back the tones
        let eq = equalize_symbol(&circular(&reference.lts_symbol, &taps), &channel, &fft);
        for (e, t) in eq.iter().zip(reference.lts_tones.iter()) {
            assert!((e - Complex::new(*t, 0.)).norm() < 1e-4);
        }
    }
}
