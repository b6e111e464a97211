//! In-memory PCM input.
//!
//! The core never reads files or resamples. Callers hand over mono samples
//! and the rate they were captured at; everything downstream borrows the
//! buffer for the duration of a single call.

use crate::error::{FingerprintError, Result};

/// Mono PCM samples plus their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f64>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap decoded samples. Fails if `sample_rate` is zero.
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(FingerprintError::invalid("sample_rate must be > 0"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert signed 16-bit PCM to the `[-1, 1)` range.
    pub fn from_i16(samples: &[i16], sample_rate: u32) -> Result<Self> {
        Self::new(
            samples.iter().map(|&s| s as f64 / 32768.0).collect(),
            sample_rate,
        )
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// A copy with every sample multiplied by `gain`.
    pub fn scaled(&self, gain: f64) -> Self {
        Self {
            samples: self.samples.iter().map(|&s| s * gain).collect(),
            sample_rate: self.sample_rate,
        }
    }
}
