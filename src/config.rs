use crate::error::ConfigError;
use crate::preamble::CP_LEN;
use serde::{Deserialize, Serialize};

/// Receiver tunables. Every field has a default, so a JSON config only needs to name the ones it
/// changes.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RxConfig {
    /// Sample rate of the incoming stream in Hz. Only used to report frequency offsets in Hz
    pub sample_rate: f64,
    /// Normalized lag-16 autocorrelation above which a packet candidate starts
    pub detect_threshold: f32,
    /// Once started, the candidate survives while the metric stays at or above this
    pub release_threshold: f32,
    /// Number of consecutive samples the metric has to hold before we commit to a packet
    pub plateau_len: usize,
    /// Length of the moving window the autocorrelation is summed over
    pub detect_window: usize,
    /// How far (in samples) from where the detector expects it we look for the first long training
    /// symbol
    pub lts_search_radius: usize,
    /// Minimum normalized long training correlation to accept a sync
    pub min_sync_confidence: f32,
    /// Minimum mean power per sample of the preamble
    pub min_energy: f32,
    /// FFT windows are moved this many samples into the cyclic prefix
    pub sample_advance: usize,
    /// Weight pilots by channel magnitude when tracking phase. Equal weights otherwise
    pub max_ratio_combining: bool,
    /// Floor on the per-subcarrier noise variance handed to the demapper
    pub min_noise_var: f32,
    /// Final path metric margin below which a Viterbi decode is flagged ambiguous
    pub tie_margin: f32,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            sample_rate: 20e6,
            detect_threshold: 0.85,
            release_threshold: 0.65,
            plateau_len: 32,
            detect_window: 32,
            lts_search_radius: 16,
            min_sync_confidence: 0.5,
            min_energy: 1e-9,
            sample_advance: 1,
            max_ratio_combining: true,
            min_noise_var: 1e-3,
            tie_margin: 1.0,
        }
    }
}

impl RxConfig {
    /// Parse a (possibly partial) JSON config and check it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if !(self.sample_rate > 0.) {
            return invalid("sample_rate must be positive");
        }
        if !(self.detect_threshold > 0. && self.detect_threshold <= 1.) {
            return invalid("detect_threshold must be in (0, 1]");
        }
        if !(self.release_threshold > 0. && self.release_threshold <= self.detect_threshold) {
            return invalid("release_threshold must be in (0, detect_threshold]");
        }
        if self.plateau_len == 0 || self.detect_window == 0 {
            return invalid("plateau_len and detect_window must be non-zero");
        }
        if self.sample_advance >= CP_LEN {
            return invalid("sample_advance must be shorter than the cyclic prefix");
        }
        if !(self.min_noise_var > 0.) {
            return invalid("min_noise_var must be positive");
        }
        Ok(())
    }
}
