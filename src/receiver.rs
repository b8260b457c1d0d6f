//! The receive loop. A `Frames` iterator walks a sample buffer with a cursor that only moves
//! forward, and goes through
//!
//! AwaitingPacket -> Synchronizing -> DemodulatingSymbol (once per OFDM symbol) -> EndOfPacket
//!
//! for every packet candidate. Each candidate yields either a decoded frame or the reason it was
//! dropped, after which scanning continues behind it.

use crate::cfo::{correct_cfo, estimate_cfo, FrequencyOffsetEstimate};
use crate::config::RxConfig;
use crate::demap::demap_symbol;
use crate::equalization::{
    equalize_symbol, extract_data, track_pilots, ChannelEstimate, PilotPhaseTrack, SymbolFft,
};
use crate::error::{ConfigError, RxError};
use crate::evm::{Diagnostics, EvmAccumulator};
use crate::interleave::InterleaverSet;
use crate::lts_align::{synchronize, LtsSync};
use crate::parse_80211::{decode_data, decode_signal, SignalField};
use crate::pkt_trigger::{detect_packet, PacketDetection};
use crate::preamble::{TrainingReference, CP_LEN, FFT_LEN, PREAMBLE_LEN, SYMBOL_LEN};
use crate::rate::Modulation;
use crate::subcarriers::DATA_SUBCARRIERS;
use crate::viterbi::{DecodeQuality, ViterbiDecoder};
use num::Complex;
use tracing::{debug, info, trace, warn};

/// Everything learned about one successfully received frame
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub detection: PacketDetection,
    pub cfo: FrequencyOffsetEstimate,
    pub sync: LtsSync,
    pub signal: SignalField,
    pub signal_quality: DecodeQuality,
    pub service: u16,
    /// PSDU bytes, FCS included
    pub psdu: Vec<u8>,
    pub fcs_ok: bool,
    /// Descrambled DATA field bits (SERVICE, PSDU, tail, pad)
    pub bits: Vec<u8>,
    pub quality: DecodeQuality,
    /// Per-subcarrier noise power measured on the long training symbols
    pub noise_power: f32,
    pub diagnostics: Diagnostics,
    /// One past the last sample of the frame
    pub end_index: usize,
}

impl DecodedFrame {
    /// The MAC frame, i.e. the PSDU without its FCS
    pub fn mac_frame(&self) -> &[u8] {
        &self.psdu[..self.psdu.len().saturating_sub(4)]
    }
}

/// Walks OFDM symbols with a fixed stride, nudged a sample at a time to follow sampling clock
/// drift
#[derive(Clone, Copy, Debug)]
struct SymbolCursor {
    /// First sample of the next FFT window
    next: usize,
    /// OFDM symbol number of the next symbol. SIGNAL is 0
    index: usize,
    /// Samples the windows have been moved from where the preamble put them. Positive is later
    shift: isize,
}

impl SymbolCursor {
    fn advance(&mut self) {
        self.next += SYMBOL_LEN;
        self.index += 1;
    }

    fn retime(&mut self, samples: isize) {
        self.next = (self.next as isize + samples) as usize;
        self.shift += samples;
    }
}

/// State of the packet currently being received. Owns the channel estimate; nothing in it
/// outlives the packet.
struct PacketContext {
    detection: PacketDetection,
    cfo: FrequencyOffsetEstimate,
    sync: LtsSync,
    channel: ChannelEstimate,
    symbols: SymbolCursor,
    /// Pilot phase of the last symbol, the reference for the next one
    track: PilotPhaseTrack,
    signal: Option<(SignalField, DecodeQuality)>,
    /// Demapped soft bits of the DATA symbols so far
    llrs: Vec<f32>,
    evm: EvmAccumulator,
}

enum RxState {
    AwaitingPacket,
    Synchronizing(PacketDetection),
    DemodulatingSymbol(Box<PacketContext>),
    EndOfPacket(Box<PacketContext>, SignalField, DecodeQuality),
}

/// Immutable receiver setup, shared by any number of `Frames` iterators (and threads)
pub struct Receiver {
    config: RxConfig,
    reference: TrainingReference,
    interleavers: InterleaverSet,
}

impl Receiver {
    pub fn new(config: RxConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            reference: TrainingReference::new(),
            interleavers: InterleaverSet::new(),
        })
    }

    pub fn config(&self) -> &RxConfig {
        &self.config
    }

    /// Lazily decode every frame in `samps`
    pub fn frames<'a>(&'a self, samps: &'a [Complex<f32>]) -> Frames<'a> {
        self.frames_from(samps, 0)
    }

    /// Lazily decode frames starting at `offset`. Use this to resume with a longer buffer after
    /// `RxError::Truncated`, or from a saved `Frames::cursor`.
    pub fn frames_from<'a>(&'a self, samps: &'a [Complex<f32>], offset: usize) -> Frames<'a> {
        Frames {
            receiver: self,
            samps,
            cursor: offset,
            state: RxState::AwaitingPacket,
            fft: SymbolFft::new(),
            decoder: ViterbiDecoder::new(self.config.tie_margin),
        }
    }

    /// Decode independent captures in parallel, one pipeline per worker thread. Results are in
    /// the same order as `captures`.
    pub fn decode_captures(
        &self,
        captures: &[Vec<Complex<f32>>],
    ) -> Vec<Vec<Result<DecodedFrame, RxError>>> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(captures.len())
            .max(1);
        let mut results: Vec<Vec<Result<DecodedFrame, RxError>>> =
            (0..captures.len()).map(|_| Vec::new()).collect();

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|w| {
                    s.spawn(move || {
                        captures
                            .iter()
                            .enumerate()
                            .skip(w)
                            .step_by(workers)
                            .map(|(i, c)| (i, self.frames(c).collect::<Vec<_>>()))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, frames) in done {
                            results[i] = frames;
                        }
                    }
                    Err(e) => std::panic::resume_unwind(e),
                }
            }
        });
        results
    }
}

/// Iterator over the frames in a buffer. Yields `Ok` for every decoded frame and `Err` for every
/// packet candidate that had to be dropped; ends when no further packet can be detected.
pub struct Frames<'a> {
    receiver: &'a Receiver,
    samps: &'a [Complex<f32>],
    /// Where the next packet search starts. Never decreases
    cursor: usize,
    state: RxState,
    fft: SymbolFft,
    decoder: ViterbiDecoder,
}

impl<'a> Frames<'a> {
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn move_cursor(&mut self, to: usize) {
        self.cursor = std::cmp::max(self.cursor, to);
    }

    fn synchronize(&self, detection: PacketDetection) -> Result<PacketContext, RxError> {
        let rx = self.receiver;
        let start = detection.start_index;
        let cfo = estimate_cfo(self.samps, start, &rx.config)?;
        let (sync, channel) = synchronize(
            self.samps,
            start,
            cfo.phase_rotation_per_sample,
            &rx.reference,
            &self.fft,
            &rx.config,
        )?;
        debug!(
            start,
            boundary = sync.boundary,
            confidence = sync.confidence,
            cfo_hz = cfo.offset_hz(),
            noise_power = channel.noise_power(),
            "synchronized"
        );

        // SIGNAL follows the second long symbol
        let first = sync.boundary + 2 * FFT_LEN + CP_LEN - rx.config.sample_advance;
        Ok(PacketContext {
            detection,
            cfo,
            sync,
            channel,
            symbols: SymbolCursor {
                next: first,
                index: 0,
                shift: 0,
            },
            track: PilotPhaseTrack::default(),
            signal: None,
            llrs: Vec::new(),
            evm: EvmAccumulator::new(),
        })
    }

    /// Demodulate the next OFDM symbol of the packet. Returns the SIGNAL field once the last
    /// symbol is in.
    fn demodulate_symbol(
        &mut self,
        ctx: &mut PacketContext,
    ) -> Result<Option<(SignalField, DecodeQuality)>, RxError> {
        let rx = self.receiver;
        let pkt_start = ctx.detection.start_index;
        let start = ctx.symbols.next;
        if start + FFT_LEN > self.samps.len() {
            return Err(RxError::Truncated {
                start: pkt_start,
                needed: start + FFT_LEN,
                available: self.samps.len(),
            });
        }

        let window = correct_cfo(
            &self.samps[start..start + FFT_LEN],
            ctx.cfo.phase_rotation_per_sample,
            start - pkt_start,
        );
        let eq = equalize_symbol(&window, &ctx.channel, &self.fft);
        ctx.track = track_pilots(
            &eq,
            ctx.symbols.index,
            &ctx.channel,
            rx.config.max_ratio_combining,
            &ctx.track,
        );
        let data = extract_data(&eq, &ctx.track);
        let noise_vars: Vec<f32> = DATA_SUBCARRIERS
            .iter()
            .map(|k| ctx.channel.equalized_noise_var(*k, rx.config.min_noise_var))
            .collect();

        let signal = match ctx.signal {
            None => {
                let llrs = demap_symbol(&data, &noise_vars, Modulation::Bpsk);
                ctx.evm.push_symbol(&data, Modulation::Bpsk);
                let bpsk = rx.interleavers.get(Modulation::Bpsk);
                let (signal, quality) = decode_signal(&llrs, bpsk, &mut self.decoder)?;
                debug!(
                    start = pkt_start,
                    rate = signal.rate.mbps(),
                    length = signal.length,
                    "SIGNAL decoded"
                );

                // Make sure the whole packet is there before demodulating any of it
                let end = frame_end(&ctx.sync, &signal);
                if end > self.samps.len() {
                    return Err(RxError::Truncated {
                        start: pkt_start,
                        needed: end,
                        available: self.samps.len(),
                    });
                }
                ctx.llrs
                    .reserve(signal.num_symbols() * signal.rate.coded_bits_per_symbol());
                ctx.signal = Some((signal, quality));
                signal
            }
            Some((signal, _)) => {
                let modulation = signal.rate.modulation();
                ctx.llrs
                    .extend(demap_symbol(&data, &noise_vars, modulation));
                ctx.evm.push_symbol(&data, modulation);
                signal
            }
        };
        ctx.symbols.advance();
        self.follow_timing(ctx);

        if ctx.symbols.index > signal.num_symbols() {
            Ok(ctx.signal)
        } else {
            Ok(None)
        }
    }

    /// Once the pilots say the symbols have drifted three quarters of a sample away from the FFT
    /// window, move the window after them. The window stays inside the cyclic prefix.
    fn follow_timing(&self, ctx: &mut PacketContext) {
        let offset = ctx.track.timing_offset();
        let advance = self.receiver.config.sample_advance as isize;
        let samples = if offset > 0.75 && ctx.symbols.shift > advance - CP_LEN as isize {
            -1
        } else if offset < -0.75 && ctx.symbols.shift < advance {
            1
        } else {
            return;
        };
        ctx.symbols.retime(samples);
        ctx.track.shift_window(samples);
        trace!(
            start = ctx.detection.start_index,
            symbol = ctx.symbols.index,
            shift = ctx.symbols.shift,
            "FFT window moved"
        );
    }

    fn finish_packet(
        &mut self,
        ctx: PacketContext,
        signal: SignalField,
        signal_quality: DecodeQuality,
    ) -> DecodedFrame {
        let interleaver = self.receiver.interleavers.get(signal.rate.modulation());
        let data = decode_data(&ctx.llrs, &signal, interleaver, &mut self.decoder);
        let start = ctx.detection.start_index;
        if data.fcs_ok {
            info!(
                start,
                rate = signal.rate.mbps(),
                length = signal.length,
                "frame decoded"
            );
        } else {
            warn!(start, rate = signal.rate.mbps(), length = signal.length, "FCS mismatch");
        }

        DecodedFrame {
            detection: ctx.detection,
            cfo: ctx.cfo,
            sync: ctx.sync,
            signal,
            signal_quality,
            service: data.service,
            psdu: data.psdu,
            fcs_ok: data.fcs_ok,
            bits: data.bits,
            quality: data.quality,
            noise_power: ctx.channel.noise_power(),
            diagnostics: ctx.evm.finish(),
            end_index: frame_end(&ctx.sync, &signal),
        }
    }

    /// Drop the candidate that started at `start` and resume behind its preamble
    fn reject(&mut self, start: usize, err: RxError) -> Option<Result<DecodedFrame, RxError>> {
        debug!(start, error = %err, "packet dropped");
        self.state = RxState::AwaitingPacket;
        self.move_cursor(start + PREAMBLE_LEN);
        Some(Err(err))
    }
}

/// One past the last sample of the frame whose first long symbol starts at `sync.boundary`
fn frame_end(sync: &LtsSync, signal: &SignalField) -> usize {
    sync.boundary + 2 * FFT_LEN + SYMBOL_LEN * (1 + signal.num_symbols())
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<DecodedFrame, RxError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, RxState::AwaitingPacket) {
                RxState::AwaitingPacket => {
                    let rx = self.receiver;
                    match detect_packet(self.samps, self.cursor, &rx.reference, &rx.config) {
                        Ok(detection) => {
                            debug!(
                                start = detection.start_index,
                                metric = detection.metric,
                                "packet detected"
                            );
                            self.state = RxState::Synchronizing(detection);
                        }
                        Err(RxError::NoPacketDetected { .. }) => {
                            self.move_cursor(self.samps.len());
                            return None;
                        }
                        Err(e) => {
                            let start = match e {
                                RxError::Truncated { start, .. } => start,
                                _ => self.cursor,
                            };
                            return self.reject(start, e);
                        }
                    }
                }
                RxState::Synchronizing(detection) => match self.synchronize(detection) {
                    Ok(ctx) => self.state = RxState::DemodulatingSymbol(Box::new(ctx)),
                    Err(e) => return self.reject(detection.start_index, e),
                },
                RxState::DemodulatingSymbol(mut ctx) => match self.demodulate_symbol(&mut ctx) {
                    Ok(Some((signal, quality))) => {
                        self.state = RxState::EndOfPacket(ctx, signal, quality)
                    }
                    Ok(None) => self.state = RxState::DemodulatingSymbol(ctx),
                    Err(e) => return self.reject(ctx.detection.start_index, e),
                },
                RxState::EndOfPacket(ctx, signal, quality) => {
                    let frame = self.finish_packet(*ctx, signal, quality);
                    self.move_cursor(frame.end_index);
                    return Some(Ok(frame));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::{Channel, Impairments};
    use crate::error::HeaderField;
    use crate::rate::Rate;
    use crate::tx::build_frame;
    use num::Zero;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn receiver() -> Receiver {
        Receiver::new(RxConfig::default()).unwrap()
    }

    fn payload(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    fn silence(n: usize) -> Vec<Complex<f32>> {
        vec![Complex::zero(); n]
    }

    #[test]
    fn test_receiver_keeps_its_config() {
        let config = RxConfig {
            sample_advance: 4,
            max_ratio_combining: false,
            ..Default::default()
        };
        assert_eq!(Receiver::new(config.clone()).unwrap().config(), &config);
        assert!(Receiver::new(RxConfig {
            sample_advance: 16,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_noise_free_all_rates() {
        let rx = receiver();
        for (i, rate) in Rate::ALL.iter().enumerate() {
            let mac = payload(60 + 7 * i, i as u64);
            let frame = build_frame(&mac, *rate, 0x5d);
            let mut samps = silence(100);
            samps.extend_from_slice(&frame.samples);
            samps.extend(silence(50));

            let decoded: Vec<_> = rx.frames(&samps).collect();
            assert_eq!(decoded.len(), 1, "{:?}", rate);
            let d = decoded[0].as_ref().unwrap();
            assert_eq!(d.detection.start_index, 100);
            assert_eq!(d.sync.boundary, 100 + 192);
            assert_eq!(d.signal, frame.signal);
            assert_eq!(d.psdu, frame.psdu);
            assert_eq!(d.mac_frame(), &mac[..]);
            assert!(d.fcs_ok);
            assert_eq!(d.service, 0);
            assert_eq!(d.end_index, 100 + frame.samples.len());
            assert!(d.cfo.offset_hz().abs() < 10.);
            assert_eq!(d.diagnostics.symbol_evm_db.len(), frame.points.len());
            assert!(d.diagnostics.packet_evm_db() < -40.);
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let rx = receiver();
        let first = build_frame(&payload(40, 1), Rate::Mbps18, 0x11);
        let second = build_frame(&payload(300, 2), Rate::Mbps48, 0x6a);
        let mut samps = silence(30);
        samps.extend_from_slice(&first.samples);
        samps.extend(silence(200));
        let second_start = samps.len();
        samps.extend_from_slice(&second.samples);
        samps.extend(silence(10));

        let mut frames = rx.frames(&samps);
        let a = frames.next().unwrap().unwrap();
        assert_eq!(a.psdu, first.psdu);
        assert_eq!(frames.cursor(), 30 + first.samples.len());
        let b = frames.next().unwrap().unwrap();
        assert_eq!(b.psdu, second.psdu);
        assert_eq!(b.detection.start_index, second_start);
        assert!(frames.next().is_none());
        assert_eq!(frames.cursor(), samps.len());
    }

    #[test]
    fn test_noisy_channel() {
        let rx = receiver();
        let mut ok = 0;
        for trial in 0..10 {
            let mac = payload(96, 100 + trial);
            let frame = build_frame(&mac, Rate::Mbps12, 0x5d);
            let mut channel = Channel::new(
                Impairments {
                    snr_db: Some(20.),
                    cfo_hz: 40e3,
                    taps: vec![(1., 0.), (0., 0.), (0.2, 0.1)],
                    lead_in: 300,
                    tail: 100,
                    ..Default::default()
                },
                trial,
            );
            let samps = channel.apply(&frame.samples);
            // Exactly one frame and nothing dropped before or after it
            let results: Vec<_> = rx.frames(&samps).collect();
            assert_eq!(results.len(), 1, "trial {}: {:?}", trial, results);
            let d = match &results[0] {
                Ok(d) => d,
                Err(e) => panic!("trial {}: {}", trial, e),
            };
            assert!((d.cfo.offset_hz() - 40e3).abs() < 2e3, "{}", d.cfo.offset_hz());
            assert!((d.detection.start_index as i64 - 300).abs() <= 2);
            assert_eq!(d.signal, frame.signal);
            if d.fcs_ok && d.mac_frame() == &mac[..] {
                ok += 1;
            }
        }
        assert!(ok >= 9, "only {} of 10 frames decoded", ok);
    }

    /// A long frame through a channel whose sampling clock is off by `drift_ppm`
    fn receive_with_drift(drift_ppm: f64, timing_offset: f64) {
        let rx = receiver();
        let mac = payload(1496, 11);
        let frame = build_frame(&mac, Rate::Mbps6, 0x5d);
        let mut channel = Channel::new(
            Impairments {
                snr_db: Some(30.),
                cfo_hz: -25e3,
                drift_ppm,
                timing_offset,
                lead_in: 200,
                tail: 200,
                ..Default::default()
            },
            3,
        );
        let samps = channel.apply(&frame.samples);
        let results: Vec<_> = rx.frames(&samps).collect();
        assert_eq!(results.len(), 1, "{} ppm: {:?}", drift_ppm, results);
        let d = match &results[0] {
            Ok(d) => d,
            Err(e) => panic!("{} ppm: {}", drift_ppm, e),
        };
        assert_eq!(d.signal, frame.signal);
        assert!(d.fcs_ok, "{} ppm: EVM {} dB", drift_ppm, d.diagnostics.packet_evm_db());
        assert_eq!(d.mac_frame(), &mac[..]);
        assert!(
            d.diagnostics.packet_evm_db() < -20.,
            "{} ppm: EVM {} dB",
            drift_ppm,
            d.diagnostics.packet_evm_db()
        );
    }

    #[test]
    fn test_clock_drift() {
        // 501 symbols: up to 3.2 samples of drift by the end of the frame
        receive_with_drift(40., 0.);
        receive_with_drift(-40., 0.3);
        receive_with_drift(-80., 0.);
        receive_with_drift(80., -0.4);
    }

    #[test]
    fn test_pure_noise() {
        let rx = receiver();
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let dist = Normal::new(0., 3.).unwrap();
        let samps: Vec<_> = (0..20000)
            .map(|_| Complex::new(dist.sample(&mut rng) as f32, dist.sample(&mut rng) as f32))
            .collect();
        let mut frames = rx.frames(&samps);
        assert!(frames.next().is_none());
        assert_eq!(frames.cursor(), samps.len());

        assert!(rx.frames(&silence(5000)).next().is_none());
        assert!(rx.frames(&[]).next().is_none());
    }

    #[test]
    fn test_truncated_then_resumed() {
        let rx = receiver();
        let frame = build_frame(&payload(200, 5), Rate::Mbps9, 0x33);
        let mut samps = silence(64);
        samps.extend_from_slice(&frame.samples);

        let cut = &samps[..samps.len() - 300];
        let results: Vec<_> = rx.frames(cut).collect();
        assert_eq!(results.len(), 1);
        let start = match &results[0] {
            Err(RxError::Truncated {
                start,
                needed,
                available,
            }) => {
                assert_eq!(*needed, samps.len());
                assert_eq!(*available, cut.len());
                *start
            }
            x => panic!("unexpected {:?}", x),
        };
        assert_eq!(start, 64);

        // More samples arrived: pick up where the truncated packet began
        let d = rx.frames_from(&samps, start).next().unwrap().unwrap();
        assert_eq!(d.psdu, frame.psdu);
    }

    #[test]
    fn test_bad_header_does_not_stop_the_scan() {
        let rx = receiver();
        let bad = build_frame(&payload(50, 6), Rate::Mbps6, 0x5d);
        let good = build_frame(&payload(50, 7), Rate::Mbps36, 0x5d);

        // Blank out everything after the preamble of the first frame: every SIGNAL soft bit is
        // zero, the decoder settles on all-zero bits and RATE 0000 does not exist
        let mut bad_samples = bad.samples.clone();
        for x in bad_samples[PREAMBLE_LEN..].iter_mut() {
            *x = Complex::zero();
        }
        let mut samps = silence(20);
        samps.extend(bad_samples);
        samps.extend(silence(100));
        samps.extend_from_slice(&good.samples);

        let results: Vec<_> = rx.frames(&samps).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0],
            Err(RxError::InvalidHeaderField {
                field: HeaderField::Rate,
                value: 0,
            })
        );
        assert_eq!(results[1].as_ref().unwrap().psdu, good.psdu);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let rx = receiver();
        let captures: Vec<Vec<Complex<f32>>> = (0..5)
            .map(|i| {
                let frame = build_frame(&payload(30 + i, i as u64), Rate::ALL[i % 8], 0x5d);
                let mut samps = silence(10 * i);
                samps.extend(frame.samples);
                samps.extend(silence(40));
                samps
            })
            .collect();

        let parallel = rx.decode_captures(&captures);
        assert_eq!(parallel.len(), captures.len());
        for (c, p) in captures.iter().zip(&parallel) {
            let sequential: Vec<_> = rx.frames(c).collect();
            assert_eq!(&sequential, p);
            assert!(p[0].as_ref().unwrap().fcs_ok);
        }
        assert!(rx.decode_captures(&[]).is_empty());
    }
}
