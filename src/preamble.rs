//! Frame timing constants and the known training waveforms. Waveforms are generated from the
//! frequency-domain tone tables with an unnormalized inverse DFT, so both training fields have a
//! mean power of 52 per sample (one unit per used subcarrier).

use crate::subcarriers::fft_bin;
use num::{Complex, Zero};
use rustfft::FFTplanner;

pub const FFT_LEN: usize = 64;
pub const CP_LEN: usize = 16;
/// Cyclic prefix + FFT window
pub const SYMBOL_LEN: usize = CP_LEN + FFT_LEN;
/// Period of the short training sequence
pub const STS_PERIOD: usize = 16;
pub const STS_REPEATS: usize = 10;
pub const STS_LEN: usize = STS_PERIOD * STS_REPEATS;
/// Guard interval before the two long training symbols
pub const LTS_GI_LEN: usize = 2 * CP_LEN;
pub const LTS_LEN: usize = LTS_GI_LEN + 2 * FFT_LEN;
pub const PREAMBLE_LEN: usize = STS_LEN + LTS_LEN;
/// Offset of the first long training symbol from the packet start
pub const LTS_OFFSET: usize = STS_LEN + LTS_GI_LEN;

/// Short training tones for subcarriers -26..=26 (before the sqrt(13/6) normalization)
const STS_TONES: [(i32, f32); 12] = [
    (-24, 1.),
    (-20, -1.),
    (-16, 1.),
    (-12, -1.),
    (-8, -1.),
    (-4, 1.),
    (4, -1.),
    (8, -1.),
    (12, 1.),
    (16, 1.),
    (20, 1.),
    (24, 1.),
];

/// Long training tones for subcarriers -26..=26, DC included as 0
const LTS_TONES: [i8; 53] = [
    1, 1, -1, -1, 1, 1, -1, 1, -1, 1, 1, 1, 1, 1, 1, -1, -1, 1, 1, -1, 1, -1, 1, 1, 1, 1, 0, 1, -1,
    -1, 1, 1, -1, 1, -1, 1, -1, -1, -1, -1, -1, 1, 1, -1, -1, 1, -1, 1, -1, 1, 1, 1, 1,
];

/// The known short and long training fields, in time and frequency
#[derive(Clone, Debug)]
pub struct TrainingReference {
    /// One 16-sample period of the short training sequence
    pub sts_period: Vec<Complex<f32>>,
    /// One 64-sample long training symbol
    pub lts_symbol: Vec<Complex<f32>>,
    /// Long training tones by FFT bin (±1 on the 52 used subcarriers, 0 elsewhere)
    pub lts_tones: [f32; FFT_LEN],
}

impl TrainingReference {
    pub fn new() -> Self {
        let mut sts_freq = vec![Complex::zero(); FFT_LEN];
        let scale = (13f32 / 6.).sqrt();
        for &(k, v) in STS_TONES.iter() {
            sts_freq[fft_bin(k)] = Complex::new(v, v) * scale;
        }

        let mut lts_tones = [0f32; FFT_LEN];
        for (i, &v) in LTS_TONES.iter().enumerate() {
            lts_tones[fft_bin(i as i32 - 26)] = v as f32;
        }
        let mut lts_freq: Vec<_> = lts_tones.iter().map(|&v| Complex::new(v, 0.)).collect();

        let sts = idft(&mut sts_freq);
        Self {
            sts_period: sts[..STS_PERIOD].to_vec(),
            lts_symbol: idft(&mut lts_freq),
            lts_tones,
        }
    }

    /// The 160 sample short training field
    pub fn short_field(&self) -> Vec<Complex<f32>> {
        self.sts_period.iter().cycle().take(STS_LEN).cloned().collect()
    }

    /// The 160 sample long training field: guard interval followed by two long symbols
    pub fn long_field(&self) -> Vec<Complex<f32>> {
        let mut res = Vec::with_capacity(LTS_LEN);
        res.extend_from_slice(&self.lts_symbol[FFT_LEN - LTS_GI_LEN..]);
        res.extend_from_slice(&self.lts_symbol);
        res.extend_from_slice(&self.lts_symbol);
        res
    }

    /// The full 320 sample preamble
    pub fn preamble(&self) -> Vec<Complex<f32>> {
        let mut res = self.short_field();
        res.extend(self.long_field());
        res
    }
}

impl Default for TrainingReference {
    fn default() -> Self {
        Self::new()
    }
}

/// Unnormalized inverse DFT. Clobbers `freq`
pub(crate) fn idft(freq: &mut [Complex<f32>]) -> Vec<Complex<f32>> {
    let mut planner = FFTplanner::new(true);
    let fft = planner.plan_fft(freq.len());
    let mut res = vec![Complex::zero(); freq.len()];
    fft.process(freq, &mut res);
    res
}
