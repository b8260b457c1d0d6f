use thiserror::Error;

/// Why a packet candidate could not be turned into a frame. None of these stop the receiver; the
/// scan resumes after the offending candidate.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RxError {
    #[error("no packet detected in samples {from}..{to}")]
    NoPacketDetected { from: usize, to: usize },

    #[error("long training symbol sync failed for packet at {start} (confidence {confidence:.3})")]
    SyncFailed { start: usize, confidence: f32 },

    #[error("preamble at {start} is too weak to estimate frequency offset (mean power {power:e})")]
    DegenerateSignal { start: usize, power: f32 },

    #[error("invalid SIGNAL field {field}: {value:#x}")]
    InvalidHeaderField { field: HeaderField, value: u32 },

    #[error("packet at {start} needs {needed} samples, only {available} available")]
    Truncated {
        start: usize,
        needed: usize,
        available: usize,
    },
}

/// The part of the SIGNAL field that failed validation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderField {
    Rate,
    Parity,
    Length,
}

impl std::fmt::Display for HeaderField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HeaderField::Rate => "RATE",
            HeaderField::Parity => "parity",
            HeaderField::Length => "LENGTH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not parse receiver config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid receiver config: {0}")]
    Invalid(String),
}
