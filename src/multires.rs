//! Multi-resolution fingerprinting.
//!
//! A single STFT size trades time resolution for frequency resolution.
//! Extracting at three sizes and blending the per-resolution similarities
//! makes matching more robust to resampling and lossy encoding.
//!
//! ```text
//! Resolution | n_fft | hop  | weight
//! -----------|-------|------|-------
//! coarse     | 1024  | 256  | 0.3
//! medium     | 2048  | 512  | 0.5
//! fine       | 4096  | 1024 | 0.2
//! ```

use crate::audio::AudioBuffer;
use crate::compare::Comparator;
use crate::error::{FingerprintError, Result};
use crate::extractor::{ExtractionParams, ExtractorKind, FingerprintExtractor, FingerprintRecord};
use serde::{Deserialize, Serialize};

/// One STFT resolution and its share of the blended score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub weight: f64,
}

impl ResolutionConfig {
    pub fn params(&self) -> Result<ExtractionParams> {
        ExtractionParams::new(self.n_fft, self.hop_length)
    }
}

pub const DEFAULT_RESOLUTIONS: [ResolutionConfig; 3] = [
    ResolutionConfig {
        n_fft: 1024,
        hop_length: 256,
        weight: 0.3,
    },
    ResolutionConfig {
        n_fft: 2048,
        hop_length: 512,
        weight: 0.5,
    },
    ResolutionConfig {
        n_fft: 4096,
        hop_length: 1024,
        weight: 0.2,
    },
];

/// Records of one buffer at every resolution, coarse to fine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiResolutionSet {
    entries: Vec<(ResolutionConfig, FingerprintRecord)>,
}

impl MultiResolutionSet {
    pub fn entries(&self) -> &[(ResolutionConfig, FingerprintRecord)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &FingerprintRecord> {
        self.entries.iter().map(|(_, record)| record)
    }

    /// Drop per-frame peak lists from every record.
    pub fn without_frames(self) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(config, record)| (config, record.without_frames()))
                .collect(),
        }
    }
}

pub struct MultiResolutionFingerprinter {
    extractor: Box<dyn FingerprintExtractor>,
    comparator: Comparator,
    resolutions: Vec<ResolutionConfig>,
}

impl MultiResolutionFingerprinter {
    pub fn new(kind: ExtractorKind, comparator: Comparator) -> Self {
        Self {
            extractor: kind.build(),
            comparator,
            resolutions: DEFAULT_RESOLUTIONS.to_vec(),
        }
    }

    /// Replace the default coarse/medium/fine triple.
    pub fn with_resolutions(mut self, resolutions: Vec<ResolutionConfig>) -> Result<Self> {
        validate_resolutions(&resolutions)?;
        self.resolutions = resolutions;
        Ok(self)
    }

    pub fn resolutions(&self) -> &[ResolutionConfig] {
        &self.resolutions
    }

    /// Extract the buffer once per resolution.
    ///
    /// Every resolution is validated before any extraction runs.
    pub fn extract_multi(&self, buffer: &AudioBuffer) -> Result<MultiResolutionSet> {
        let params = self
            .resolutions
            .iter()
            .map(ResolutionConfig::params)
            .collect::<Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(params.len());
        for (config, params) in self.resolutions.iter().zip(params.iter()) {
            entries.push((*config, self.extractor.extract(buffer, params)?));
        }

        Ok(MultiResolutionSet { entries })
    }

    /// Weighted mean of per-resolution similarities.
    ///
    /// Sets of different lengths, and sets with no positive total weight,
    /// score `0.0`. Weights are taken from the query set.
    pub fn compare_multi(&self, query: &MultiResolutionSet, candidate: &MultiResolutionSet) -> f64 {
        if query.len() != candidate.len() || query.is_empty() {
            return 0.0;
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for ((config, a), (_, b)) in query.entries.iter().zip(candidate.entries.iter()) {
            weighted += config.weight * self.comparator.compare_records(a, b);
            total_weight += config.weight;
        }

        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }
}

impl Default for MultiResolutionFingerprinter {
    fn default() -> Self {
        Self::new(ExtractorKind::default(), Comparator::default())
    }
}

/// Check a custom resolution list before use.
pub fn validate_resolutions(resolutions: &[ResolutionConfig]) -> Result<()> {
    if resolutions.is_empty() {
        return Err(FingerprintError::invalid("at least one resolution is required"));
    }
    for config in resolutions {
        config.params()?;
        if !config.weight.is_finite() || config.weight < 0.0 {
            return Err(FingerprintError::invalid(format!(
                "resolution weight must be finite and >= 0, got {}",
                config.weight
            )));
        }
    }
    Ok(())
}
