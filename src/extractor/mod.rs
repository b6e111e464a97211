//! Spectral peak fingerprint extraction
//!
//! Turns an [`AudioBuffer`] into a [`FingerprintRecord`]: a compact,
//! normalized time×band energy vector plus a quantized digest that callers
//! use as a cache key.
//!
//! # How Extraction Works
//!
//! ```text
//! PCM ──STFT──▶ |X[t][k]| ──per band──▶ adaptive peaks ──▶ time×band matrix
//!                                                              │
//!                            hash ◀── round(v·1000) ◀── normalize by max
//! ```
//!
//! Every frame is split into six fixed frequency bands:
//!
//! ```text
//! Band | Range (Hz)    | Typical content
//! -----|---------------|------------------------------
//!  0   | 0 - 250       | kick, bass fundamentals
//!  1   | 250 - 500     | low mids, voice fundamentals
//!  2   | 500 - 2000    | most melodic content
//!  3   | 2000 - 4000   | presence, consonants
//!  4   | 4000 - 8000   | brilliance, cymbals
//!  5   | 8000 - 16000  | air
//! ```
//!
//! Inside a band a bin is a peak if it is a local maximum, lies more than
//! two standard deviations above the band mean, and sits at least
//! [`MIN_PEAK_DISTANCE`] bins away from any stronger peak. At most
//! [`PEAKS_PER_BAND`] survive per band and frame.
//!
//! # Implementations
//!
//! Two interchangeable strategies implement [`FingerprintExtractor`]:
//!
//! - [`ReferenceExtractor`]: materializes the whole spectrogram, one frame at
//!   a time, with no buffer reuse. Easy to audit.
//! - [`OptimizedExtractor`]: fuses FFT and peak picking per frame, reuses
//!   scratch buffers and fans frames out over rayon.
//!
//! Both share the per-frame arithmetic in [`spectral`], so their compact
//! vectors and hashes are byte-identical. Callers cache by hash; any drift
//! between the two would be a correctness bug.

pub mod optimized;
pub mod reference;
pub mod spectral;

use crate::audio::AudioBuffer;
use crate::error::{FingerprintError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use optimized::OptimizedExtractor;
pub use reference::ReferenceExtractor;

/// Fixed analysis bands in Hz, `[low, high)`.
pub const BANDS: [(u32, u32); 6] = [
    (0, 250),
    (250, 500),
    (500, 2000),
    (2000, 4000),
    (4000, 8000),
    (8000, 16000),
];

pub const BAND_COUNT: usize = BANDS.len();

/// Maximum peaks kept per band and frame.
pub const PEAKS_PER_BAND: usize = 3;

/// Minimum spacing between two peaks of the same band, in bins.
pub const MIN_PEAK_DISTANCE: usize = 5;

/// Smallest accepted STFT window.
pub const MIN_N_FFT: usize = 256;

/// Quantization factor applied before hashing.
pub const HASH_QUANTIZATION: f64 = 1000.0;

// ============================================================================
// Parameters
// ============================================================================

/// STFT window size and stride, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawExtractionParams")]
pub struct ExtractionParams {
    n_fft: usize,
    hop_length: usize,
}

#[derive(Deserialize)]
struct RawExtractionParams {
    n_fft: usize,
    hop_length: usize,
}

impl TryFrom<RawExtractionParams> for ExtractionParams {
    type Error = FingerprintError;

    fn try_from(raw: RawExtractionParams) -> Result<Self> {
        ExtractionParams::new(raw.n_fft, raw.hop_length)
    }
}

impl ExtractionParams {
    pub fn new(n_fft: usize, hop_length: usize) -> Result<Self> {
        let params = Self { n_fft, hop_length };
        params.validate()?;
        Ok(params)
    }

    /// Check the invariants. Extractors call this again before any work.
    pub fn validate(&self) -> Result<()> {
        if self.n_fft < MIN_N_FFT {
            return Err(FingerprintError::invalid(format!(
                "n_fft must be >= {}, got {}",
                MIN_N_FFT, self.n_fft
            )));
        }
        if !self.n_fft.is_power_of_two() {
            return Err(FingerprintError::invalid(format!(
                "n_fft must be a power of two, got {}",
                self.n_fft
            )));
        }
        if self.hop_length == 0 || self.hop_length > self.n_fft {
            return Err(FingerprintError::invalid(format!(
                "hop_length must be in 1..={}, got {}",
                self.n_fft, self.hop_length
            )));
        }
        Ok(())
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Number of magnitude bins per frame.
    pub fn bin_count(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
        }
    }
}

// ============================================================================
// Output types
// ============================================================================

/// One spectral peak inside a band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub frequency: f64,
    pub bin: usize,
    pub magnitude: f64,
    pub band: usize,
}

/// Peaks of one STFT frame, band by band, each band magnitude-descending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintFrame {
    /// Frame centre in seconds (`index * hop_length / sample_rate`).
    pub time_offset: f64,
    pub peaks: Vec<Peak>,
}

/// Row-major `time_bins × BAND_COUNT` matrix, normalized into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactFingerprint {
    values: Vec<f64>,
    time_bins: usize,
}

impl CompactFingerprint {
    pub(crate) fn from_parts(values: Vec<f64>, time_bins: usize) -> Self {
        debug_assert_eq!(values.len(), time_bins * BAND_COUNT);
        Self { values, time_bins }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn time_bins(&self) -> usize {
        self.time_bins
    }

    pub fn band_count(&self) -> usize {
        BAND_COUNT
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True for empty vectors and all-zero vectors.
    pub fn is_silent(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// Values as fed into the digest.
    pub fn quantized(&self) -> Vec<i32> {
        self.values
            .iter()
            .map(|&v| (v * HASH_QUANTIZATION).round() as i32)
            .collect()
    }

    /// The row for one time bin.
    pub fn row(&self, time_bin: usize) -> Option<&[f64]> {
        let start = time_bin.checked_mul(BAND_COUNT)?;
        self.values.get(start..start + BAND_COUNT)
    }
}

/// Everything extraction produces for one buffer.
///
/// `n_fft` and `hop_length` are kept so caches can tell whether two records
/// were produced with the same parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<Vec<FingerprintFrame>>,
    compact: CompactFingerprint,
    hash: String,
    confidence: f64,
    peak_count: usize,
    duration: f64,
    sample_rate: u32,
    n_fft: usize,
    hop_length: usize,
}

impl FingerprintRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        frames: Option<Vec<FingerprintFrame>>,
        compact: CompactFingerprint,
        hash: String,
        confidence: f64,
        peak_count: usize,
        duration: f64,
        sample_rate: u32,
        n_fft: usize,
        hop_length: usize,
    ) -> Self {
        Self {
            frames,
            compact,
            hash,
            confidence,
            peak_count,
            duration,
            sample_rate,
            n_fft,
            hop_length,
        }
    }

    pub fn frames(&self) -> Option<&[FingerprintFrame]> {
        self.frames.as_deref()
    }

    pub fn compact(&self) -> &CompactFingerprint {
        &self.compact
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Mean over frames with peaks of each frame's mean peak magnitude.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn peak_count(&self) -> usize {
        self.peak_count
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Same record with the per-frame peak list dropped.
    pub fn without_frames(mut self) -> Self {
        self.frames = None;
        self
    }

    /// Records are only interchangeable when produced with identical
    /// sample rate and STFT parameters.
    pub fn is_compatible_with(&self, other: &FingerprintRecord) -> bool {
        self.sample_rate == other.sample_rate
            && self.n_fft == other.n_fft
            && self.hop_length == other.hop_length
    }
}

// ============================================================================
// Extractor strategy
// ============================================================================

/// A fingerprint extraction strategy.
///
/// Implementations hold no per-call state, so a single instance may be
/// reused for many buffers. Batch workers still build their own instance.
pub trait FingerprintExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, buffer: &AudioBuffer, params: &ExtractionParams)
        -> Result<FingerprintRecord>;
}

/// Selects an extractor implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Reference,
    #[default]
    Optimized,
}

impl ExtractorKind {
    pub fn build(self) -> Box<dyn FingerprintExtractor> {
        match self {
            ExtractorKind::Reference => Box::new(ReferenceExtractor::new()),
            ExtractorKind::Optimized => Box::new(OptimizedExtractor::new()),
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractorKind::Reference => write!(f, "reference"),
            ExtractorKind::Optimized => write!(f, "optimized"),
        }
    }
}

impl FromStr for ExtractorKind {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" => Ok(ExtractorKind::Reference),
            "optimized" => Ok(ExtractorKind::Optimized),
            other => Err(FingerprintError::invalid(format!(
                "unknown extractor '{}' (expected reference or optimized)",
                other
            ))),
        }
    }
}

/// Fingerprint a buffer with the default (optimized) extractor.
pub fn extract(buffer: &AudioBuffer, params: &ExtractionParams) -> Result<FingerprintRecord> {
    OptimizedExtractor::new().extract(buffer, params)
}
