//! Receives 802.11a/g frames from a synthetic testbench, a raw I/Q recording or a JSON bundle of
//! captures, and writes one JSON line per decoded frame to stdout.
//!
//! Raw recordings are interleaved little-endian `f32` I and Q at 20 MHz. They are first cut into
//! bursts of activity, which are then decoded in parallel. Bundles are a JSON object mapping a
//! capture name to `[[re, im], ...]`.

use clap::{Parser, Subcommand};
use failure::{format_err, Error};
use num::Complex;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use wifi_rx::{build_frame, Channel, DecodedFrame, Impairments, Rate, Receiver, RxConfig, RxError};

/// Number of captures handed to the worker threads at a time
const BATCH: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Receiver configuration (JSON). Defaults are used for anything missing
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Samples the FFT window is moved into the cyclic prefix
    #[arg(long)]
    sample_advance: Option<usize>,

    /// Weight pilots equally instead of by channel gain
    #[arg(long)]
    no_max_ratio_combining: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Transmit a random frame through a simulated channel and receive it
    Testbench {
        /// PSDU length in bytes, FCS included
        #[arg(long, default_value = "1000")]
        length: usize,
        /// Data rate in Mbit/s
        #[arg(long, default_value = "12")]
        rate: u32,
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Channel impairments (JSON). Overrides the built-in channel
        #[arg(long)]
        impairments: Option<String>,
    },
    /// Raw I/Q recording
    Iq {
        file: String,
        /// Magnitude above which a sample counts as activity
        #[arg(long, default_value = "0.004")]
        threshold: f32,
        /// Quiet samples allowed inside one burst
        #[arg(long, default_value = "100")]
        max_gap: usize,
        /// Samples kept on either side of a burst
        #[arg(long, default_value = "50")]
        padding: usize,
    },
    /// JSON bundle of named captures
    Bundle { file: String },
}

/// What gets printed for every decoded frame
#[derive(Serialize)]
struct FrameReport<'a> {
    capture: &'a str,
    start: usize,
    end: usize,
    rate_mbps: u32,
    length: usize,
    service: u16,
    fcs_ok: bool,
    cfo_hz: f64,
    sync_confidence: f32,
    noise_power: f32,
    evm_db: f32,
    ambiguous: bool,
    mac_frame: String,
    /// Testbench only: fraction of MAC frame bytes received correctly
    #[serde(skip_serializing_if = "Option::is_none")]
    matching_bytes: Option<f64>,
}

impl<'a> FrameReport<'a> {
    fn new(capture: &'a str, frame: &DecodedFrame) -> Self {
        Self {
            capture,
            start: frame.detection.start_index,
            end: frame.end_index,
            rate_mbps: frame.signal.rate.mbps(),
            length: frame.signal.length,
            service: frame.service,
            fcs_ok: frame.fcs_ok,
            cfo_hz: frame.cfo.offset_hz(),
            sync_confidence: frame.sync.confidence,
            noise_power: frame.noise_power,
            evm_db: frame.diagnostics.packet_evm_db(),
            ambiguous: frame.signal_quality.ambiguous || frame.quality.ambiguous,
            mac_frame: frame.mac_frame().iter().map(|b| format!("{:02x}", b)).collect(),
            matching_bytes: None,
        }
    }
}

fn print_report(report: &FrameReport) -> Result<(), Error> {
    println!("{}", serde_json::to_string(report)?);
    Ok(())
}

/// Log a dropped packet candidate. Returns the frame if there was one
fn ok_or_log(capture: &str, res: Result<DecodedFrame, RxError>) -> Option<DecodedFrame> {
    match res {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(capture, "{}", e);
            None
        }
    }
}

/// Cut a recording into bursts where active samples are at most `max_gap` apart
fn split_bursts(
    samps: &[Complex<f32>],
    threshold: f32,
    max_gap: usize,
    padding: usize,
) -> Vec<Vec<Complex<f32>>> {
    let mut res = Vec::new();
    let mut burst: Option<(usize, usize)> = None;
    let mut cut = |first: usize, last: usize| {
        let from = first.saturating_sub(padding);
        let to = std::cmp::min(samps.len(), last + padding + 1);
        res.push(samps[from..to].to_vec());
    };
    for (i, x) in samps.iter().enumerate() {
        if x.norm() <= threshold {
            continue;
        }
        burst = match burst {
            Some((first, last)) if i - last > max_gap + 1 => {
                cut(first, last);
                Some((i, i))
            }
            Some((first, _)) => Some((first, i)),
            None => Some((i, i)),
        };
    }
    if let Some((first, last)) = burst {
        cut(first, last);
    }
    res
}

fn read_iq(path: &str) -> Result<Vec<Complex<f32>>, Error> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 8 != 0 {
        warn!(path, "recording ends in a partial sample");
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            Complex::new(
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect())
}

fn read_bundle(path: &str) -> Result<Vec<(String, Vec<Complex<f32>>)>, Error> {
    let bundle: BTreeMap<String, Vec<(f32, f32)>> =
        serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(bundle
        .into_iter()
        .map(|(name, samps)| {
            let samps = samps.into_iter().map(|(re, im)| Complex::new(re, im)).collect();
            (name, samps)
        })
        .collect())
}

/// Decode captures batch by batch until done or asked to close
fn run_captures(
    receiver: &Receiver,
    captures: Vec<(String, Vec<Complex<f32>>)>,
    close: &AtomicBool,
) -> Result<(), Error> {
    let mut decoded = 0;
    for batch in captures.chunks(BATCH) {
        if close.load(Ordering::Relaxed) {
            info!("interrupted");
            break;
        }
        let samps: Vec<Vec<Complex<f32>>> = batch.iter().map(|(_, s)| s.clone()).collect();
        for ((name, _), results) in batch.iter().zip(receiver.decode_captures(&samps)) {
            for res in results {
                if let Some(frame) = ok_or_log(name, res) {
                    print_report(&FrameReport::new(name, &frame))?;
                    decoded += 1;
                }
            }
        }
    }
    info!(captures = captures.len(), decoded, "done");
    Ok(())
}

fn testbench(
    receiver: &Receiver,
    length: usize,
    rate: u32,
    seed: u64,
    impairments: Option<Impairments>,
) -> Result<(), Error> {
    let rate = Rate::from_mbps(rate).ok_or_else(|| format_err!("no such rate: {} Mbit/s", rate))?;
    if length < 5 || length > wifi_rx::MAX_PSDU_LEN {
        return Err(format_err!("PSDU length must be in 5..={}", wifi_rx::MAX_PSDU_LEN));
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mac: Vec<u8> = (0..length - 4).map(|_| rng.gen()).collect();
    let frame = build_frame(&mac, rate, wifi_rx::scrambler::DEFAULT_SEED);
    let impairments = impairments.unwrap_or_else(|| Impairments {
        snr_db: Some(35.),
        cfo_hz: -100e3,
        taps: vec![(1., 0.), (0.3, -0.2), (0.1, 0.05)],
        lead_in: 10,
        tail: 20,
        ..Default::default()
    });
    info!(?rate, length, ?impairments, "transmitting");
    let samps = Channel::new(impairments, seed).apply(&frame.samples);

    let mut decoded = 0;
    for res in receiver.frames(&samps) {
        if let Some(rx) = ok_or_log("testbench", res) {
            let mut report = FrameReport::new("testbench", &rx);
            let matching = rx.mac_frame().iter().zip(&mac).filter(|(a, b)| a == b).count();
            report.matching_bytes = Some(matching as f64 / mac.len() as f64);
            print_report(&report)?;
            decoded += 1;
        }
    }
    if decoded == 0 {
        warn!("frame lost");
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => RxConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => RxConfig::default(),
    };
    if let Some(advance) = args.sample_advance {
        config.sample_advance = advance;
    }
    if args.no_max_ratio_combining {
        config.max_ratio_combining = false;
    }
    let receiver = Receiver::new(config)?;
    info!(config = ?receiver.config(), "receiver ready");

    // Stop between batches on Ctrl-C
    let close = Arc::new(AtomicBool::new(false));
    let close_handler = close.clone();
    ctrlc::set_handler(move || {
        close_handler.store(true, Ordering::Relaxed);
    })?;

    match args.mode {
        Mode::Testbench {
            length,
            rate,
            seed,
            impairments,
        } => {
            let impairments = match impairments {
                Some(path) => Some(serde_json::from_str(&std::fs::read_to_string(path)?)?),
                None => None,
            };
            testbench(&receiver, length, rate, seed, impairments)
        }
        Mode::Iq {
            file,
            threshold,
            max_gap,
            padding,
        } => {
            let samps = read_iq(&file)?;
            let captures: Vec<_> = split_bursts(&samps, threshold, max_gap, padding)
                .into_iter()
                .enumerate()
                .map(|(i, burst)| (format!("{}#{}", file, i), burst))
                .collect();
            info!(samples = samps.len(), bursts = captures.len(), "recording loaded");
            run_captures(&receiver, captures, &close)
        }
        Mode::Bundle { file } => {
            let captures = read_bundle(&file)?;
            info!(captures = captures.len(), "bundle loaded");
            run_captures(&receiver, captures, &close)
        }
    }
}
