/// Seed used by the synthetic transmitter unless told otherwise
pub const DEFAULT_SEED: u8 = 0b101_1101;
const STATE_BITS: usize = 7;

/// The x^7 + x^4 + 1 frame scrambler. Scrambling and descrambling are the same operation.
#[derive(Clone, Copy, Debug)]
pub struct Scrambler {
    /// Shift register, oldest bit in the LSB
    state: u8,
}

impl Scrambler {
    pub fn new(seed: u8) -> Self {
        Self { state: seed & 0x7f }
    }

    /// Recover the scrambler from the start of a scrambled DATA field. The first seven SERVICE bits
    /// are zero before scrambling, so the first seven received bits are the scrambler's own
    /// output, which then becomes its state.
    pub fn from_service(scrambled: &[u8]) -> Self {
        assert!(scrambled.len() >= STATE_BITS);
        let state = scrambled[..STATE_BITS]
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, b)| acc | ((b & 1) << i));
        Self { state }
    }

    pub fn next_bit(&mut self) -> u8 {
        let fb = (self.state & 1) ^ ((self.state >> 3) & 1);
        self.state = (self.state >> 1) | (fb << 6);
        fb
    }

    pub fn apply(&mut self, bits: &[u8]) -> Vec<u8> {
        bits.iter().map(|b| b ^ self.next_bit()).collect()
    }
}

pub fn scramble(bits: &[u8], seed: u8) -> Vec<u8> {
    Scrambler::new(seed).apply(bits)
}

/// Descramble a DATA field without knowing the seed. The first seven output bits are the zero
/// SERVICE bits
pub fn descramble(scrambled: &[u8]) -> Vec<u8> {
    if scrambled.len() < STATE_BITS {
        return vec![0; scrambled.len()];
    }
    let mut scrambler = Scrambler::from_service(scrambled);
    let mut res = vec![0; STATE_BITS];
    res.extend(scrambler.apply(&scrambled[STATE_BITS..]));
    res
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_all_ones_sequence() {
        // Sequence generated by the all-ones initial state
        let mut s = Scrambler::new(0x7f);
        let seq: Vec<u8> = (0..16).map(|_| s.next_bit()).collect();
        assert_eq!(seq, vec![0, 0, 0, 0, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 1, 0]);

        // Period is 127
        let mut s = Scrambler::new(0x7f);
        let first: Vec<u8> = (0..127).map(|_| s.next_bit()).collect();
        let second: Vec<u8> = (0..127).map(|_| s.next_bit()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scramble_roundtrip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let bits: Vec<u8> = (0..300).map(|_| rng.gen::<bool>() as u8).collect();
        for seed in 1..128u8 {
            let scrambled = scramble(&bits, seed);
            assert_eq!(scramble(&scrambled, seed), bits);
        }
    }

    #[test]
    fn test_self_synchronizing_descramble() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let mut bits = vec![0u8; 16];
        bits.extend((0..200).map(|_| rng.gen::<bool>() as u8));
        for seed in [1u8, DEFAULT_SEED, 0x7f, 0x40].iter() {
            let scrambled = scramble(&bits, *seed);
            assert_eq!(descramble(&scrambled), bits);
        }
    }
}
