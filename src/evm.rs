use crate::demap::nearest_point;
use crate::rate::Modulation;
use crate::subcarriers::NUM_DATA_SUBCARRIERS;
use num::Complex;

/// Powers are floored here before going to dB
const POWER_FLOOR: f64 = 1e-12;

fn to_db(power: f64) -> f32 {
    (10. * power.max(POWER_FLOOR).log10()) as f32
}

/// Error vector magnitude of a decoded packet, measured against the nearest constellation point
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    /// EVM of each data subcarrier over the whole packet, in dB
    pub subcarrier_evm_db: Vec<f32>,
    /// EVM of each OFDM symbol (SIGNAL first), in dB
    pub symbol_evm_db: Vec<f32>,
    /// Equalized, phase-corrected data subcarrier values, symbol after symbol
    pub constellation: Vec<Complex<f32>>,
}

impl Diagnostics {
    /// EVM over the whole packet, in dB
    pub fn packet_evm_db(&self) -> f32 {
        let n = self.subcarrier_evm_db.len();
        if n == 0 {
            return to_db(0.);
        }
        let mean = self
            .subcarrier_evm_db
            .iter()
            .map(|db| 10f64.powf(*db as f64 / 10.))
            .sum::<f64>()
            / n as f64;
        to_db(mean)
    }
}

/// Collects decision-directed error statistics symbol by symbol
pub struct EvmAccumulator {
    subcarrier_err: Vec<f64>,
    symbols: usize,
    diag: Diagnostics,
}

impl EvmAccumulator {
    pub fn new() -> Self {
        Self {
            subcarrier_err: vec![0.; NUM_DATA_SUBCARRIERS],
            symbols: 0,
            diag: Diagnostics::default(),
        }
    }

    /// Add the 48 data subcarrier values of one symbol
    pub fn push_symbol(&mut self, points: &[Complex<f32>], modulation: Modulation) {
        assert_eq!(points.len(), NUM_DATA_SUBCARRIERS);
        let mut symbol_err = 0.;
        for (acc, p) in self.subcarrier_err.iter_mut().zip(points) {
            let err = (p - nearest_point(*p, modulation)).norm_sqr() as f64;
            *acc += err;
            symbol_err += err;
        }
        self.symbols += 1;
        self.diag
            .symbol_evm_db
            .push(to_db(symbol_err / NUM_DATA_SUBCARRIERS as f64));
        self.diag.constellation.extend_from_slice(points);
    }

    pub fn finish(mut self) -> Diagnostics {
        let n = std::cmp::max(self.symbols, 1) as f64;
        self.diag.subcarrier_evm_db = self.subcarrier_err.iter().map(|e| to_db(e / n)).collect();
        self.diag
    }
}

impl Default for EvmAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
