//! Synthetic 802.11a/g transmitter, used to produce test frames and to drive the testbench.

use crate::demap::map_bits;
use crate::fcs::append_fcs;
use crate::interleave::Interleaver;
use crate::parse_80211::{bytes_to_bits, SignalField, MAX_PSDU_LEN, SERVICE_BITS};
use crate::preamble::{idft, TrainingReference, CP_LEN, FFT_LEN};
use crate::puncture::puncture;
use crate::rate::{Modulation, Rate};
use crate::scrambler::scramble;
use crate::subcarriers::{fft_bin, pilot_values, DATA_SUBCARRIERS, PILOT_SUBCARRIERS};
use crate::viterbi::{conv_encode, TAIL_LEN};
use num::{Complex, Zero};

/// A modulated frame and what went into it
#[derive(Clone, Debug)]
pub struct TxFrame {
    /// Baseband samples: preamble, SIGNAL and DATA symbols
    pub samples: Vec<Complex<f32>>,
    /// Data subcarrier values of every OFDM symbol, SIGNAL first
    pub points: Vec<Vec<Complex<f32>>>,
    /// PSDU including FCS
    pub psdu: Vec<u8>,
    pub signal: SignalField,
}

/// One OFDM symbol (cyclic prefix included) carrying `points` on the data subcarriers
fn ofdm_symbol(points: &[Complex<f32>], symbol_index: usize) -> Vec<Complex<f32>> {
    let mut freq = vec![Complex::zero(); FFT_LEN];
    for (k, p) in DATA_SUBCARRIERS.iter().zip(points) {
        freq[fft_bin(*k)] = *p;
    }
    for (k, p) in PILOT_SUBCARRIERS.iter().zip(pilot_values(symbol_index).iter()) {
        freq[fft_bin(*k)] = Complex::new(*p, 0.);
    }
    let time = idft(&mut freq);
    let mut res = Vec::with_capacity(CP_LEN + FFT_LEN);
    res.extend_from_slice(&time[FFT_LEN - CP_LEN..]);
    res.extend_from_slice(&time);
    res
}

/// Build a frame carrying `mac_frame` (the FCS is appended here)
pub fn build_frame(mac_frame: &[u8], rate: Rate, scrambler_seed: u8) -> TxFrame {
    let psdu = append_fcs(mac_frame);
    assert!(psdu.len() <= MAX_PSDU_LEN);
    let signal = SignalField::new(rate, psdu.len());

    let bpsk = Interleaver::new(Modulation::Bpsk);
    let mut points = vec![map_bits(
        &bpsk.interleave(&conv_encode(&signal.to_bits())),
        Modulation::Bpsk,
    )];

    // SERVICE, PSDU, tail, pad
    let num_symbols = signal.num_symbols();
    let mut bits = vec![0u8; SERVICE_BITS];
    bits.extend(bytes_to_bits(&psdu));
    bits.resize(num_symbols * rate.data_bits_per_symbol(), 0);
    let mut scrambled = scramble(&bits, scrambler_seed);
    // Tail bits go out unscrambled so the encoder ends in state 0
    let tail = SERVICE_BITS + 8 * psdu.len();
    for b in scrambled[tail..tail + TAIL_LEN].iter_mut() {
        *b = 0;
    }
    let coded = puncture(&conv_encode(&scrambled), rate.code_rate());

    let modulation = rate.modulation();
    let interleaver = Interleaver::new(modulation);
    for symbol in coded.chunks(rate.coded_bits_per_symbol()) {
        points.push(map_bits(&interleaver.interleave(symbol), modulation));
    }

    let mut samples = TrainingReference::new().preamble();
    for (i, p) in points.iter().enumerate() {
        samples.extend(ofdm_symbol(p, i));
    }
    TxFrame {
        samples,
        points,
        psdu,
        signal,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::preamble::{PREAMBLE_LEN, SYMBOL_LEN};

    #[test]
    fn test_frame_layout() {
        let frame = build_frame(&[0xaa; 96], Rate::Mbps12, 0x5d);
        assert_eq!(frame.psdu.len(), 100);
        assert_eq!(frame.signal.num_symbols(), 18);
        assert_eq!(frame.points.len(), 19);
        assert_eq!(frame.samples.len(), PREAMBLE_LEN + 19 * SYMBOL_LEN);

        // Cyclic prefix of the SIGNAL symbol
        let s = &frame.samples[PREAMBLE_LEN..PREAMBLE_LEN + SYMBOL_LEN];
        for i in 0..CP_LEN {
            assert_eq!(s[i], s[i + FFT_LEN]);
        }
    }

    #[test]
    fn test_data_symbol_power() {
        // Unit energy points on 52 subcarriers: mean power 52 per sample, same as the preamble
        let frame = build_frame(&[0x3c; 200], Rate::Mbps54, 0x1f);
        let data = &frame.samples[PREAMBLE_LEN..];
        let power = data.iter().map(|x| x.norm_sqr()).sum::<f32>() / data.len() as f32;
        assert!((power - 52.).abs() < 5., "{}", power);
    }
}
