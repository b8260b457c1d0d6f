use crate::preamble::FFT_LEN;

pub const NUM_DATA_SUBCARRIERS: usize = 48;
pub const NUM_PILOTS: usize = 4;

pub const PILOT_SUBCARRIERS: [i32; NUM_PILOTS] = [-21, -7, 7, 21];
/// Pilot values in symbol 0, before the polarity sequence is applied
pub const PILOT_BASE: [f32; NUM_PILOTS] = [1., 1., 1., -1.];

/// Data subcarriers in the order coded bits are mapped onto them
pub const DATA_SUBCARRIERS: [i32; NUM_DATA_SUBCARRIERS] = [
    -26, -25, -24, -23, -22, -20, -19, -18, -17, -16, -15, -14, -13, -12, -11, -10, -9, -8, -6, -5,
    -4, -3, -2, -1, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 22, 23,
    24, 25, 26,
];

/// Pilot polarity per OFDM symbol. The SIGNAL symbol uses entry 0
const PILOT_POLARITY: [i8; 127] = [
    1, 1, 1, 1, -1, -1, -1, 1, -1, -1, -1, -1, 1, 1, -1, 1, -1, -1, 1, 1, -1, 1, 1, -1, 1, 1, 1, 1,
    1, 1, -1, 1, 1, 1, -1, 1, 1, -1, -1, 1, 1, 1, -1, 1, -1, -1, -1, 1, -1, 1, -1, -1, 1, -1, -1,
    1, 1, 1, 1, 1, -1, -1, 1, 1, -1, -1, 1, -1, 1, -1, 1, 1, -1, -1, -1, 1, 1, -1, -1, -1, -1, 1,
    -1, -1, 1, -1, 1, 1, 1, 1, -1, 1, -1, 1, -1, 1, -1, -1, -1, -1, -1, 1, -1, 1, 1, -1, 1, -1, 1,
    1, 1, -1, -1, 1, -1, -1, -1, 1, 1, 1, -1, -1, -1, -1, -1, -1, -1,
];

/// FFT bin that carries subcarrier `k`
pub fn fft_bin(k: i32) -> usize {
    k.rem_euclid(FFT_LEN as i32) as usize
}

pub fn pilot_polarity(symbol_index: usize) -> f32 {
    PILOT_POLARITY[symbol_index % PILOT_POLARITY.len()] as f32
}

/// Expected (noise-free, unit channel) pilot values for the given OFDM symbol
pub fn pilot_values(symbol_index: usize) -> [f32; NUM_PILOTS] {
    let p = pilot_polarity(symbol_index);
    let mut res = PILOT_BASE;
    for v in res.iter_mut() {
        *v *= p;
    }
    res
}
