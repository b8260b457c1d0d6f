//! Rate 1/2, constraint length 7 convolutional code (generators 133 and 171 octal) and a soft
//! decision Viterbi decoder for it.

use serde::Serialize;

pub const NUM_STATES: usize = 64;
/// Zero bits appended by the transmitter to return the encoder to state 0
pub const TAIL_LEN: usize = 6;
const G0: usize = 0o133;
const G1: usize = 0o171;

fn parity(x: usize) -> u8 {
    (x.count_ones() & 1) as u8
}

/// Encoder outputs (A, B) when `bit` enters an encoder in `state`. The state holds the previous
/// six input bits, most recent in the MSB.
fn branch_outputs(state: usize, bit: u8) -> (u8, u8) {
    let reg = ((bit as usize) << 6) | state;
    (parity(reg & G0), parity(reg & G1))
}

/// Encode `bits` from the all-zero state. Output is A0 B0 A1 B1 ...
pub fn conv_encode(bits: &[u8]) -> Vec<u8> {
    let mut state = 0;
    let mut res = Vec::with_capacity(2 * bits.len());
    for b in bits {
        let (a, c) = branch_outputs(state, *b);
        res.push(a);
        res.push(c);
        state = ((((*b as usize) << 6) | state) >> 1) & (NUM_STATES - 1);
    }
    res
}

/// How confidently a block was decoded
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DecodeQuality {
    /// Path metric of the chosen end state minus that of the runner-up
    pub margin: f32,
    /// Number of add-compare-select steps where both candidates scored exactly the same
    pub ties: usize,
    /// `margin` fell below the configured tie margin
    pub ambiguous: bool,
}

/// Soft-decision Viterbi decoder. The survivor arena is reused across calls, so one decoder per
/// thread is enough.
pub struct ViterbiDecoder {
    tie_margin: f32,
    /// Expected output signs (+1 for bit 1) for every (predecessor state, input bit)
    signs: [[(f32, f32); 2]; NUM_STATES],
    /// `survivors[t * NUM_STATES + s]` is 1 if the odd predecessor won into state `s` at step `t`
    survivors: Vec<u8>,
}

impl ViterbiDecoder {
    pub fn new(tie_margin: f32) -> Self {
        let sign = |b: u8| if b == 1 { 1. } else { -1. };
        let mut signs = [[(0., 0.); 2]; NUM_STATES];
        for (state, s) in signs.iter_mut().enumerate() {
            for bit in 0..2u8 {
                let (a, b) = branch_outputs(state, bit);
                s[bit as usize] = (sign(a), sign(b));
            }
        }
        Self {
            tie_margin,
            signs,
            survivors: Vec::new(),
        }
    }

    /// Decode pairs of LLRs (positive means 1, 0 means erased). Ties between equal metrics go to
    /// the lower-numbered predecessor, and the end state is the best final metric (lowest index on
    /// a tie), so the output is deterministic.
    pub fn decode(&mut self, llrs: &[f32]) -> (Vec<u8>, DecodeQuality) {
        assert_eq!(llrs.len() % 2, 0);
        let steps = llrs.len() / 2;
        self.survivors.clear();
        self.survivors.resize(steps * NUM_STATES, 0);

        let mut metrics = [std::f32::NEG_INFINITY; NUM_STATES];
        metrics[0] = 0.;
        let mut ties = 0;
        for t in 0..steps {
            let (la, lb) = (llrs[2 * t], llrs[2 * t + 1]);
            let mut next = [0f32; NUM_STATES];
            for ns in 0..NUM_STATES {
                let bit = ns >> 5;
                let p0 = (ns & 31) << 1;
                let p1 = p0 | 1;
                let (a0, b0) = self.signs[p0][bit];
                let (a1, b1) = self.signs[p1][bit];
                let m0 = metrics[p0] + a0 * la + b0 * lb;
                let m1 = metrics[p1] + a1 * la + b1 * lb;
                if m1 > m0 {
                    next[ns] = m1;
                    self.survivors[t * NUM_STATES + ns] = 1;
                } else {
                    if m1 == m0 && m0.is_finite() {
                        ties += 1;
                    }
                    next[ns] = m0;
                }
            }
            // Keep metrics bounded
            let max = next.iter().cloned().fold(std::f32::NEG_INFINITY, f32::max);
            for m in next.iter_mut() {
                *m -= max;
            }
            metrics = next;
        }

        let mut best = 0;
        for s in 1..NUM_STATES {
            if metrics[s] > metrics[best] {
                best = s;
            }
        }
        let runner_up = (0..NUM_STATES)
            .filter(|s| *s != best)
            .map(|s| metrics[s])
            .fold(std::f32::NEG_INFINITY, f32::max);
        let margin = metrics[best] - runner_up;

        let mut bits = vec![0u8; steps];
        let mut state = best;
        for t in (0..steps).rev() {
            bits[t] = (state >> 5) as u8;
            state = ((state & 31) << 1) | self.survivors[t * NUM_STATES + state] as usize;
        }

        let quality = DecodeQuality {
            margin,
            ties,
            ambiguous: !(margin >= self.tie_margin),
        };
        (bits, quality)
    }
}
