//! Receiver for 802.11a/g OFDM frames at 20 MHz. We assume the standard packet structure:
//! <Short Preamble> <Long Preamble> <SIGNAL> [<Data symbols> ...]
//!
//! Short Preamble:
//!  - 10 repeats of a 16 sample short training sequence
//!
//! Long Preamble:
//!  - <Guard Interval> 2 * <Long Training Sequence>
//!    The guard interval is 1/2 the size of the LTS, which is 64 samples long
//!
//! SIGNAL and Data symbols:
//!  - <Cyclic Prefix> <64 sample symbol>, 16 samples of prefix. SIGNAL is always BPSK rate 1/2
//!    and tells us the rate and length of the rest
//!
//! `Receiver::frames` turns a buffer of samples into an iterator over decoded frames. The stages
//! (detection, frequency offset, timing and channel estimation, demodulation, decoding) are
//! public modules and can be used on their own.

pub mod cfo;
pub mod channel;
pub mod config;
pub mod demap;
pub mod equalization;
pub mod error;
pub mod evm;
pub mod fcs;
pub mod interleave;
pub mod lts_align;
pub mod parse_80211;
pub mod pkt_trigger;
pub mod preamble;
pub mod puncture;
pub mod rate;
pub mod receiver;
pub mod scrambler;
pub mod subcarriers;
pub mod tx;
pub mod viterbi;

pub use cfo::{correct_cfo, estimate_cfo, FrequencyOffsetEstimate};
pub use channel::{Channel, Impairments};
pub use config::RxConfig;
pub use equalization::{equalize_symbol, estimate_channel, ChannelEstimate};
pub use error::{ConfigError, HeaderField, RxError};
pub use evm::Diagnostics;
pub use lts_align::{lts_align, LtsSync};
pub use parse_80211::{SignalField, MAX_PSDU_LEN};
pub use pkt_trigger::{detect_packet, PacketDetection, PktTrigger};
pub use preamble::TrainingReference;
pub use rate::{CodeRate, Modulation, Rate};
pub use receiver::{DecodedFrame, Frames, Receiver};
pub use tx::{build_frame, TxFrame};
pub use viterbi::{DecodeQuality, ViterbiDecoder};
