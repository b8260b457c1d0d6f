use crate::error::{HeaderField, RxError};
use crate::fcs::check_fcs;
use crate::interleave::Interleaver;
use crate::puncture::depuncture;
use crate::rate::Rate;
use crate::scrambler::descramble;
use crate::viterbi::{DecodeQuality, ViterbiDecoder};
use serde::Serialize;

pub const SIGNAL_BITS: usize = 24;
pub const SERVICE_BITS: usize = 16;
/// LENGTH is a 12 bit field
pub const MAX_PSDU_LEN: usize = 4095;
const PARITY_BIT: usize = 17;

/// Bits LSB first within each byte
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|b| (0..8).map(move |i| (b >> i) & 1))
        .collect()
}

/// Inverse of `bytes_to_bits`. A trailing partial byte is dropped
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|c| c.iter().enumerate().fold(0, |acc, (i, b)| acc | ((b & 1) << i)))
        .collect()
}

/// Contents of the SIGNAL symbol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SignalField {
    pub rate: Rate,
    /// PSDU length in bytes, FCS included
    pub length: usize,
}

impl SignalField {
    pub fn new(rate: Rate, length: usize) -> Self {
        assert!(length >= 1 && length <= MAX_PSDU_LEN);
        Self { rate, length }
    }

    /// Number of DATA symbols that follow
    pub fn num_symbols(&self) -> usize {
        self.rate.num_symbols(self.length)
    }

    /// RATE (R1 first), reserved, LENGTH (LSB first), even parity, six tail bits
    pub fn to_bits(&self) -> [u8; SIGNAL_BITS] {
        let mut bits = [0u8; SIGNAL_BITS];
        let rate = self.rate.signal_bits();
        for i in 0..4 {
            bits[i] = (rate >> (3 - i)) & 1;
        }
        for i in 0..12 {
            bits[5 + i] = ((self.length >> i) & 1) as u8;
        }
        bits[PARITY_BIT] = bits[..PARITY_BIT].iter().sum::<u8>() & 1;
        bits
    }

    pub fn from_bits(bits: &[u8]) -> Result<Self, RxError> {
        assert!(bits.len() >= SIGNAL_BITS);
        let parity = bits[..=PARITY_BIT].iter().fold(0, |acc, b| acc ^ (b & 1));
        if parity != 0 {
            let value = bits[..=PARITY_BIT]
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, b)| acc | ((*b as u32 & 1) << i));
            return Err(RxError::InvalidHeaderField {
                field: HeaderField::Parity,
                value,
            });
        }

        let rate_bits = bits[..4].iter().fold(0u8, |acc, b| (acc << 1) | (b & 1));
        let rate = Rate::from_signal_bits(rate_bits).ok_or(RxError::InvalidHeaderField {
            field: HeaderField::Rate,
            value: rate_bits as u32,
        })?;

        let length = bits[5..17]
            .iter()
            .enumerate()
            .fold(0usize, |acc, (i, b)| acc | ((*b as usize & 1) << i));
        if length == 0 {
            return Err(RxError::InvalidHeaderField {
                field: HeaderField::Length,
                value: 0,
            });
        }
        Ok(Self { rate, length })
    }
}

/// Decode the SIGNAL symbol from its 48 demapped (still interleaved) soft bits
pub fn decode_signal(
    llrs: &[f32],
    interleaver: &Interleaver,
    decoder: &mut ViterbiDecoder,
) -> Result<(SignalField, DecodeQuality), RxError> {
    let (bits, quality) = decoder.decode(&interleaver.deinterleave(llrs));
    Ok((SignalField::from_bits(&bits)?, quality))
}

/// Decoded DATA field
#[derive(Clone, Debug, PartialEq)]
pub struct DataField {
    pub service: u16,
    /// PSDU bytes, FCS included
    pub psdu: Vec<u8>,
    pub fcs_ok: bool,
    /// Full descrambled bit stream: SERVICE, PSDU, tail and pad
    pub bits: Vec<u8>,
    pub quality: DecodeQuality,
}

/// Decode the DATA field from the demapped soft bits of all its symbols, in symbol order
pub fn decode_data(
    llrs: &[f32],
    signal: &SignalField,
    interleaver: &Interleaver,
    decoder: &mut ViterbiDecoder,
) -> DataField {
    let ncbps = interleaver.len();
    assert_eq!(llrs.len(), signal.num_symbols() * ncbps);

    let mut coded = Vec::with_capacity(llrs.len());
    for symbol in llrs.chunks(ncbps) {
        coded.extend(interleaver.deinterleave(symbol));
    }
    let (mut scrambled, quality) = decoder.decode(&depuncture(&coded, signal.rate.code_rate()));
    scrambled.truncate(signal.num_symbols() * signal.rate.data_bits_per_symbol());

    let bits = descramble(&scrambled);
    let service = bits[..SERVICE_BITS]
        .iter()
        .enumerate()
        .fold(0u16, |acc, (i, b)| acc | ((*b as u16) << i));
    let psdu = bits_to_bytes(&bits[SERVICE_BITS..SERVICE_BITS + 8 * signal.length]);
    DataField {
        service,
        fcs_ok: check_fcs(&psdu),
        psdu,
        bits,
        quality,
    }
}
