//! Sonoprint - Spectral peak audio fingerprinting
//!
//! Sonoprint turns decoded PCM audio into compact, comparable fingerprints
//! and finds near-duplicate recordings in large collections.
//!
//! # Overview
//!
//! A fingerprint summarizes where the strongest spectral peaks of a
//! recording sit, band by band, over time. Two encodings of the same
//! recording (different bitrate, different volume) produce fingerprints
//! with a very similar shape, while unrelated recordings do not.
//!
//! # Pipeline
//!
//! 1. **Extract**: PCM buffer → [`FingerprintRecord`] (compact vector + hash)
//! 2. **Shortlist**: [`LshIndex`] buckets similar vectors together, so a
//!    query only looks at a handful of candidates
//! 3. **Score**: [`Comparator`] ranks the shortlist exactly
//!
//! [`FingerprintCatalog`] wires steps 2 and 3 together.
//!
//! # Quick Start
//!
//! ```no_run
//! use sonoprint::{AudioBuffer, Comparator, ExtractionParams};
//!
//! let a = AudioBuffer::new(vec![0.0; 44100], 44100)?;
//! let b = AudioBuffer::new(vec![0.0; 44100], 44100)?;
//!
//! let params = ExtractionParams::default();
//! let fa = sonoprint::extract(&a, &params)?;
//! let fb = sonoprint::extract(&b, &params)?;
//!
//! let score = Comparator::default().compare_records(&fa, &fb);
//! println!("similarity: {:.3}", score);
//! # Ok::<(), sonoprint::FingerprintError>(())
//! ```
//!
//! # Similarity Scale
//!
//! | Score | Meaning |
//! |-------|---------|
//! | 0.95 - 1.0 | Same recording (re-encode, gain change) |
//! | 0.8 - 0.95 | Likely the same recording, degraded |
//! | < 0.8 | Different recordings |
//!
//! # Modules
//!
//! - [`extractor`]: STFT peak extraction, reference and optimized strategies
//! - [`compare`]: similarity scoring and match ranking
//! - [`lsh`]: random-hyperplane candidate index
//! - [`multires`]: fingerprints at three STFT resolutions
//! - [`batch`]: parallel extraction over many buffers
//! - [`codec`]: versioned binary encoding for stored records
//! - [`catalog`]: LSH shortlist + exact ranking
//! - [`decode`]: compressed audio → PCM (used by the CLI)
//! - [`report`]: output formatters (JSON, CSV)

pub mod audio;
pub mod batch;
pub mod catalog;
pub mod codec;
pub mod compare;
pub mod config;
pub mod decode;
pub mod error;
pub mod extractor;
pub mod lsh;
pub mod multires;
pub mod report;

pub use audio::AudioBuffer;
pub use batch::{device_info, BatchExtractor, DeviceInfo, DispatchMode};
pub use catalog::FingerprintCatalog;
pub use compare::{Candidate, Comparator, Match, MatchThresholds, SimilarityComponents, SimilarityWeights};
pub use config::Config;
pub use error::{FingerprintError, Result};
pub use extractor::{
    extract, CompactFingerprint, ExtractionParams, ExtractorKind, FingerprintExtractor,
    FingerprintFrame, FingerprintRecord, OptimizedExtractor, Peak, ReferenceExtractor,
};
pub use lsh::{LshCandidate, LshConfig, LshIndex, LshStats, DEFAULT_LSH_SEED};
pub use multires::{MultiResolutionFingerprinter, MultiResolutionSet, ResolutionConfig};
