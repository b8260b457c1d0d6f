use crate::config::RxConfig;
use crate::error::RxError;
use crate::preamble::{TrainingReference, PREAMBLE_LEN, STS_LEN, STS_PERIOD, STS_REPEATS};
use num::Complex;
use std::collections::VecDeque;
use tracing::trace;

/// How far before the start of a plateau the packet may begin
const LOOKBACK: usize = 5 * STS_PERIOD;
/// Running sums are recomputed from scratch this often to stop rounding errors from piling up
const RESYNC_INTERVAL: usize = 1024;

/// A detected packet
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacketDetection {
    /// First sample of the short training field
    pub start_index: usize,
    /// Highest normalized autocorrelation seen on the plateau (at most 1)
    pub metric: f32,
    /// Sample at which the plateau became long enough to commit to the packet
    pub trigger_index: usize,
}

/// A run of high autocorrelation reported by `PktTrigger`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plateau {
    /// Sample at which the metric first crossed the detection threshold
    pub start: usize,
    /// Sample at which the run became `plateau_len` long
    pub end: usize,
    pub peak: f32,
}

enum PktTriggerState {
    /// Waiting for the metric to cross the detection threshold
    Idle,
    /// Metric crossed the detection threshold at `start` and has stayed above the release
    /// threshold for `len` samples
    Plateau { start: usize, len: usize, peak: f32 },
    /// Plateau already reported. Wait for the metric to drop before looking again
    Triggered,
}

/// Looks for the 16-sample periodicity of the short training field. The metric is the lag-16
/// autocorrelation normalized by the energy of both windows, so it is bounded by 1 and does not
/// react to sudden power changes. A packet is flagged when the metric crosses
/// `detect_threshold` and then stays at or above `release_threshold` for `plateau_len` samples.
pub struct PktTrigger {
    detect_threshold: f32,
    release_threshold: f32,
    plateau_len: usize,
    window_len: usize,
    /// Below this, the windows are treated as silence
    min_power: f64,
    /// The last `STS_PERIOD + 1` samples
    hist: VecDeque<Complex<f32>>,
    /// Lag product, power and delayed power of every sample in the window
    window: VecDeque<(Complex<f64>, f64, f64)>,
    corr: Complex<f64>,
    power: f64,
    power_delayed: f64,
    /// Index of the next sample to be pushed
    pos: usize,
    state: PktTriggerState,
}

impl PktTrigger {
    /// `first_index` is the index that the first pushed sample will be reported as
    pub fn new(config: &RxConfig, first_index: usize) -> Self {
        Self {
            detect_threshold: config.detect_threshold,
            release_threshold: config.release_threshold,
            plateau_len: config.plateau_len,
            window_len: config.detect_window,
            min_power: config.min_energy as f64 * config.detect_window as f64,
            hist: VecDeque::with_capacity(STS_PERIOD + 1),
            window: VecDeque::with_capacity(config.detect_window + 1),
            corr: Complex::new(0., 0.),
            power: 0.,
            power_delayed: 0.,
            pos: first_index,
            state: PktTriggerState::Idle,
        }
    }

    /// Current value of the normalized autocorrelation. Zero until the window is full: a handful
    /// of products always looks perfectly correlated
    pub fn metric(&self) -> f32 {
        if self.window.len() < self.window_len {
            return 0.;
        }
        let (p, pd) = (self.power.max(0.), self.power_delayed.max(0.));
        if p <= self.min_power || pd <= self.min_power {
            return 0.;
        }
        (self.corr.norm() / (p * pd).sqrt()) as f32
    }

    fn update_sums(&mut self, samp: Complex<f32>) {
        self.hist.push_back(samp);
        if self.hist.len() <= STS_PERIOD {
            return;
        }
        let delayed = self.hist[0];
        self.hist.pop_front();

        let x = Complex::new(samp.re as f64, samp.im as f64);
        let d = Complex::new(delayed.re as f64, delayed.im as f64);
        let entry = (x * d.conj(), x.norm_sqr(), d.norm_sqr());
        self.corr += entry.0;
        self.power += entry.1;
        self.power_delayed += entry.2;
        self.window.push_back(entry);
        if self.window.len() > self.window_len {
            if let Some((c, p, pd)) = self.window.pop_front() {
                self.corr -= c;
                self.power -= p;
                self.power_delayed -= pd;
            }
        }

        if self.pos % RESYNC_INTERVAL == 0 {
            self.corr = self.window.iter().map(|e| e.0).sum();
            self.power = self.window.iter().map(|e| e.1).sum();
            self.power_delayed = self.window.iter().map(|e| e.2).sum();
        }
    }

    /// Takes in a sample and returns a plateau when one has just been confirmed
    pub fn push_samp(&mut self, samp: Complex<f32>) -> Option<Plateau> {
        self.update_sums(samp);
        let idx = self.pos;
        self.pos += 1;
        let metric = self.metric();

        match self.state {
            PktTriggerState::Idle => {
                if metric > self.detect_threshold {
                    self.state = PktTriggerState::Plateau {
                        start: idx,
                        len: 1,
                        peak: metric,
                    };
                }
                None
            }
            PktTriggerState::Plateau { start, len, peak } => {
                if metric < self.release_threshold {
                    trace!(start, len, "autocorrelation plateau too short");
                    self.state = PktTriggerState::Idle;
                    return None;
                }
                let (len, peak) = (len + 1, peak.max(metric));
                if len >= self.plateau_len {
                    self.state = PktTriggerState::Triggered;
                    Some(Plateau {
                        start,
                        end: idx,
                        peak,
                    })
                } else {
                    self.state = PktTriggerState::Plateau { start, len, peak };
                    None
                }
            }
            PktTriggerState::Triggered => {
                if metric < self.release_threshold {
                    self.state = PktTriggerState::Idle;
                }
                None
            }
        }
    }
}

/// Matched-filter score for a short training field starting at `n`: sum over the ten periods of
/// the magnitude of each period's correlation with the known pattern
fn sts_score(samps: &[Complex<f32>], n: usize, sts: &[Complex<f32>]) -> f32 {
    (0..STS_REPEATS)
        .map(|b| {
            sts.iter()
                .enumerate()
                .map(|(j, s)| s.conj() * samps[n + b * STS_PERIOD + j])
                .sum::<Complex<f32>>()
                .norm()
        })
        .sum()
}

/// Place the packet start near a plateau. Returns `None` if no candidate fits in the buffer
fn refine_start(
    samps: &[Complex<f32>],
    from: usize,
    plateau_start: usize,
    reference: &TrainingReference,
) -> Option<usize> {
    let lo = std::cmp::max(from, plateau_start.saturating_sub(LOOKBACK));
    let hi = std::cmp::min(plateau_start + STS_PERIOD, samps.len().checked_sub(STS_LEN)?);
    let mut best: Option<(usize, f32)> = None;
    for n in lo..=hi {
        let score = sts_score(samps, n, &reference.sts_period);
        match best {
            Some((_, s)) if s >= score => {}
            _ => best = Some((n, score)),
        }
    }
    best.map(|(n, _)| n)
}

/// Scan `samps` from `from` for the next packet
pub fn detect_packet(
    samps: &[Complex<f32>],
    from: usize,
    reference: &TrainingReference,
    config: &RxConfig,
) -> Result<PacketDetection, RxError> {
    let mut trigger = PktTrigger::new(config, from);
    for samp in samps.iter().skip(from) {
        let plateau = match trigger.push_samp(*samp) {
            Some(p) => p,
            None => continue,
        };
        let truncated = |start: usize| RxError::Truncated {
            start,
            needed: start + PREAMBLE_LEN,
            available: samps.len(),
        };
        let start = refine_start(samps, from, plateau.start, reference)
            .ok_or_else(|| truncated(plateau.start.saturating_sub(LOOKBACK).max(from)))?;
        if start + PREAMBLE_LEN > samps.len() {
            return Err(truncated(start));
        }
        trace!(
            start,
            plateau_start = plateau.start,
            plateau_end = plateau.end,
            "packet start refined"
        );
        return Ok(PacketDetection {
            start_index: start,
            metric: plateau.peak,
            trigger_index: plateau.end,
        });
    }
    Err(RxError::NoPacketDetected {
        from,
        to: samps.len(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use num::Zero;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn noise(n: usize, std: f64, seed: u64) -> Vec<Complex<f32>> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let dist = Normal::new(0., std).unwrap();
        (0..n)
            .map(|_| Complex::new(dist.sample(&mut rng) as f32, dist.sample(&mut rng) as f32))
            .collect()
    }

    /// Zeros, a preamble at `start` and a tail of silence
    fn preamble_at(start: usize) -> Vec<Complex<f32>> {
        let reference = TrainingReference::new();
        let mut samps = vec![Complex::zero(); start];
        samps.extend(reference.preamble());
        samps.extend(vec![Complex::zero(); 200]);
        samps
    }

    #[test]
    fn test_exact_start_without_noise() {
        let reference = TrainingReference::new();
        let config = RxConfig::default();
        for start in [0, 1, 57, 300].iter() {
            let samps = preamble_at(*start);
            let det = detect_packet(&samps, 0, &reference, &config).unwrap();
            assert_eq!(det.start_index, *start);
            assert!(det.metric > 0.99);
            assert!(det.trigger_index > det.start_index);
        }
    }

    #[test]
    fn test_start_in_noise() {
        let reference = TrainingReference::new();
        let config = RxConfig::default();
        // 20 dB below the 52 per sample training power
        let std = (0.52f64 / 2.).sqrt();
        let mut samps = noise(1000, std, 9);
        for (i, x) in reference.preamble().iter().enumerate() {
            samps[400 + i] += x;
        }
        let det = detect_packet(&samps, 0, &reference, &config).unwrap();
        assert!((det.start_index as i64 - 400).abs() <= 1, "{}", det.start_index);
    }

    #[test]
    fn test_nothing_to_detect() {
        let reference = TrainingReference::new();
        let config = RxConfig::default();
        let silence = vec![Complex::zero(); 2000];
        match detect_packet(&silence, 0, &reference, &config) {
            Err(RxError::NoPacketDetected { from: 0, to: 2000 }) => {}
            x => panic!("unexpected {:?}", x),
        }
        match detect_packet(&noise(5000, 1., 4), 0, &reference, &config) {
            Err(RxError::NoPacketDetected { from: 0, to: 5000 }) => {}
            x => panic!("unexpected {:?}", x),
        }
        // Scanning from past the end is not an error condition of its own
        match detect_packet(&silence, 5000, &reference, &config) {
            Err(RxError::NoPacketDetected {
                from: 5000,
                to: 2000,
            }) => {}
            x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn test_scan_starts_at_from() {
        let reference = TrainingReference::new();
        let config = RxConfig::default();
        let samps = preamble_at(100);
        // Starting past the packet finds nothing
        assert!(detect_packet(&samps, 300, &reference, &config).is_err());
        let det = detect_packet(&samps, 50, &reference, &config).unwrap();
        assert_eq!(det.start_index, 100);
    }

    #[test]
    fn test_truncated_preamble() {
        let reference = TrainingReference::new();
        let config = RxConfig::default();
        let mut samps = vec![Complex::zero(); 100];
        samps.extend(reference.preamble().iter().take(250));
        match detect_packet(&samps, 0, &reference, &config) {
            Err(RxError::Truncated { start: 100, .. }) => {}
            x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn test_trigger_rearms() {
        let config = RxConfig::default();
        let mut samps = preamble_at(10);
        samps.extend(preamble_at(10));
        let mut trigger = PktTrigger::new(&config, 0);
        let plateaus: Vec<_> = samps.iter().filter_map(|s| trigger.push_samp(*s)).collect();
        assert_eq!(plateaus.len(), 2);
        assert!(plateaus[0].end - plateaus[0].start + 1 >= config.plateau_len);
    }

    #[test]
    fn test_metric_waits_for_full_window() {
        let reference = TrainingReference::new();
        let config = RxConfig::default();
        let preamble = reference.preamble();
        let mut trigger = PktTrigger::new(&config, 0);
        // The first product needs STS_PERIOD samples of history
        let needed = STS_PERIOD + config.detect_window;
        for (i, x) in preamble.iter().take(needed).enumerate() {
            trigger.push_samp(*x);
            if i + 1 < needed {
                assert_eq!(trigger.metric(), 0., "{}", i);
            }
        }
        assert!(trigger.metric() > 0.99);

        // Started right behind a burst, a few leftover samples are not a packet
        let mut samps: Vec<_> = preamble[..20].to_vec();
        samps.extend(noise(400, 1e-3, 5));
        match detect_packet(&samps, 0, &reference, &config) {
            Err(RxError::NoPacketDetected { from: 0, to: 420 }) => {}
            x => panic!("unexpected {:?}", x),
        }
    }
}
