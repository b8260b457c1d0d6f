//! Simple channel model for exercising the receiver: multipath, sampling clock drift and offset,
//! carrier frequency offset and additive white Gaussian noise, plus silence around the frame.

use num::{Complex, Zero};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::f64::consts::PI;
use tracing::warn;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Impairments {
    /// Signal to noise ratio in dB, relative to the mean power of the frame. `None` adds no noise
    pub snr_db: Option<f64>,
    /// Carrier frequency offset in Hz
    pub cfo_hz: f64,
    pub sample_rate: f64,
    /// Channel impulse response, one tap per sample
    pub taps: Vec<(f32, f32)>,
    /// Silence before the frame, in samples
    pub lead_in: usize,
    /// Silence after the frame, in samples
    pub tail: usize,
    /// Sampling clock error in parts per million. Positive means the receiver samples slower
    /// than the transmitter, so the frame arrives compressed
    pub drift_ppm: f64,
    /// Sampling phase. Received sample `m` is taken at transmitted time
    /// `timing_offset + m * (1 + drift_ppm / 1e6)`
    pub timing_offset: f64,
}

/// Half-width of the interpolation filter, in samples
const SINC_HALF_WIDTH: isize = 16;

impl Default for Impairments {
    fn default() -> Self {
        Self {
            snr_db: None,
            cfo_hz: 0.,
            sample_rate: 20e6,
            taps: vec![(1., 0.)],
            lead_in: 0,
            tail: 0,
            drift_ppm: 0.,
            timing_offset: 0.,
        }
    }
}

pub struct Channel {
    impairments: Impairments,
    rng: StdRng,
}

impl Channel {
    pub fn new(impairments: Impairments, seed: u64) -> Self {
        Self {
            impairments,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pass `frame` through the channel. Without drift or timing offset the output is
    /// `lead_in + frame.len() + taps - 1 + tail` samples long
    pub fn apply(&mut self, frame: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let imp = &self.impairments;
        let signal_power = if frame.is_empty() {
            0.
        } else {
            frame.iter().map(|x| x.norm_sqr() as f64).sum::<f64>() / frame.len() as f64
        };

        let taps: Vec<Complex<f32>> = imp.taps.iter().map(|(re, im)| Complex::new(*re, *im)).collect();
        let mut res = vec![Complex::zero(); imp.lead_in];
        let conv_len = frame.len() + taps.len().saturating_sub(1);
        for n in 0..conv_len {
            let mut y = Complex::zero();
            for (i, t) in taps.iter().enumerate() {
                if n >= i && n - i < frame.len() {
                    y += t * frame[n - i];
                }
            }
            res.push(y);
        }
        res.extend(vec![Complex::zero(); imp.tail]);

        if imp.drift_ppm != 0. || imp.timing_offset != 0. {
            let step = 1. + imp.drift_ppm * 1e-6;
            if step > 0. {
                res = resample(&res, imp.timing_offset, step);
            } else {
                warn!(drift_ppm = imp.drift_ppm, "not resampling: clock runs backwards");
            }
        }

        let rot = 2. * PI * imp.cfo_hz / imp.sample_rate;
        if rot != 0. {
            for (n, x) in res.iter_mut().enumerate() {
                let phase = rot * n as f64;
                *x *= Complex::new(phase.cos() as f32, phase.sin() as f32);
            }
        }

        if let Some(noise) = imp.snr_db.and_then(|snr_db| noise_source(signal_power, snr_db)) {
            for x in res.iter_mut() {
                *x += Complex::new(
                    noise.sample(&mut self.rng) as f32,
                    noise.sample(&mut self.rng) as f32,
                );
            }
        }
        res
    }
}

/// Per-component Gaussian noise that gives `snr_db` against `signal_power`
fn noise_source(signal_power: f64, snr_db: f64) -> Option<Normal<f64>> {
    let std_dev = (signal_power / 10f64.powf(snr_db / 10.) / 2.).sqrt();
    if !std_dev.is_finite() {
        warn!(snr_db, signal_power, "not adding noise: deviation is not finite");
        return None;
    }
    match Normal::new(0., std_dev) {
        Ok(noise) => Some(noise),
        Err(e) => {
            warn!(snr_db, "not adding noise: {:?}", e);
            None
        }
    }
}

/// Band-limited value of `x` at fractional time `t`, with a Hann-windowed sinc
fn interpolate(x: &[Complex<f32>], t: f64) -> Complex<f32> {
    let center = t.floor() as isize;
    let mut y = Complex::zero();
    for n in center - SINC_HALF_WIDTH + 1..=center + SINC_HALF_WIDTH {
        if n < 0 || n as usize >= x.len() {
            continue;
        }
        let d = t - n as f64;
        let sinc = if d.abs() < 1e-9 {
            1.
        } else {
            (PI * d).sin() / (PI * d)
        };
        let window = 0.5 + 0.5 * (PI * d / SINC_HALF_WIDTH as f64).cos();
        y += x[n as usize] * (sinc * window) as f32;
    }
    y
}

/// Sample `x` at `offset + m * step` for `m = 0, 1, ...` until past its last sample. Times before
/// the first sample see zeros
fn resample(x: &[Complex<f32>], offset: f64, step: f64) -> Vec<Complex<f32>> {
    let last = x.len() as f64 - 1.;
    let mut res = Vec::new();
    let mut m = 0;
    loop {
        let t = offset + m as f64 * step;
        if t > last {
            break;
        }
        res.push(interpolate(x, t));
        m += 1;
    }
    res
}
