use crate::cfo::correct_cfo;
use crate::config::RxConfig;
use crate::equalization::{estimate_channel, ChannelEstimate, SymbolFft};
use crate::error::RxError;
use crate::preamble::{TrainingReference, FFT_LEN, LTS_OFFSET};
use num::Complex;

/// Where the long training symbols were found
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LtsSync {
    /// Index of the first sample of the first long training symbol
    pub boundary: usize,
    /// Geometric mean of the normalized correlation with the two long symbols, in [0, 1]
    pub confidence: f32,
}

/// Normalized correlation of `window` with the known long symbol `lts`, whose norm is `lts_norm`
fn normalized_corr(window: &[Complex<f32>], lts: &[Complex<f32>], lts_norm: f32) -> f32 {
    let energy = window.iter().map(|x| x.norm_sqr()).sum::<f32>();
    if !(energy > 0.) {
        return 0.;
    }
    let corr = lts
        .iter()
        .zip(window)
        .map(|(l, x)| l.conj() * x)
        .sum::<Complex<f32>>()
        .norm();
    corr / (lts_norm * energy.sqrt())
}

/// Use the long training sequence to align the start of the packet. `pkt` must start at the
/// packet's first sample and be CFO corrected, and the search covers offsets
/// `expected - radius..=expected + radius` (relative to `pkt`). Each offset `i` scores the product
/// of the correlations at `i` and `i + 64`, which peaks on the first of the two identical symbols
/// rather than the second.
pub fn lts_align(
    pkt: &[Complex<f32>],
    expected: usize,
    radius: usize,
    lts: &[Complex<f32>],
) -> Option<LtsSync> {
    let lts_norm = lts.iter().map(|x| x.norm_sqr()).sum::<f32>().sqrt();
    let lo = expected.saturating_sub(radius);
    let hi = std::cmp::min(expected + radius, pkt.len().checked_sub(2 * FFT_LEN)?);
    if lo > hi {
        return None;
    }

    // Compute cross correlation with the known LTS
    let corr: Vec<f32> = (lo..=hi + FFT_LEN)
        .map(|i| normalized_corr(&pkt[i..i + FFT_LEN], lts, lts_norm))
        .collect();

    let (mut max, mut max_idx) = (0f32, lo);
    for i in 0..=hi - lo {
        let val = corr[i] * corr[i + FFT_LEN];
        if val > max {
            max = val;
            max_idx = lo + i;
        }
    }
    Some(LtsSync {
        boundary: max_idx,
        confidence: max.sqrt(),
    })
}

/// Find the long training symbols of a packet detected at `start` (with CFO `cfo` in radians per
/// sample) and estimate the channel from them. The returned boundary is an absolute index into
/// `samps`.
pub fn synchronize(
    samps: &[Complex<f32>],
    start: usize,
    cfo: f64,
    reference: &TrainingReference,
    fft: &SymbolFft,
    config: &RxConfig,
) -> Result<(LtsSync, ChannelEstimate), RxError> {
    let radius = config.lts_search_radius;
    let end = start + LTS_OFFSET + radius + 2 * FFT_LEN;
    if end > samps.len() {
        return Err(RxError::Truncated {
            start,
            needed: end,
            available: samps.len(),
        });
    }
    let pkt = correct_cfo(&samps[start..end], cfo, 0);

    let sync = match lts_align(&pkt, LTS_OFFSET, radius, &reference.lts_symbol) {
        Some(s) if s.confidence >= config.min_sync_confidence => s,
        s => {
            return Err(RxError::SyncFailed {
                start,
                confidence: s.map(|s| s.confidence).unwrap_or(0.),
            })
        }
    };

    // Move the FFT windows slightly into the guard interval, as for data symbols
    let t1 = sync.boundary.saturating_sub(config.sample_advance);
    let channel = estimate_channel(
        &pkt[t1..t1 + FFT_LEN],
        &pkt[t1 + FFT_LEN..t1 + 2 * FFT_LEN],
        reference,
        fft,
    );

    Ok((
        LtsSync {
            boundary: start + sync.boundary,
            confidence: sync.confidence,
        },
        channel,
    ))
}
