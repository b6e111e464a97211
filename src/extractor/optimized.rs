//! Frame-parallel extractor.
//!
//! Never materializes the padded signal or the spectrogram. Each rayon
//! split owns one frame buffer, one FFT scratch buffer and one magnitude
//! row, and runs FFT and peak picking back to back. Results are collected
//! in frame order, and the arithmetic per frame is exactly the reference
//! arithmetic, so output is byte-identical.
//!
//! This is a CPU strategy. Nothing here runs on an accelerator.

use super::spectral::{self, BandLayout};
use super::{ExtractionParams, FingerprintExtractor, FingerprintRecord, Peak};
use crate::audio::AudioBuffer;
use crate::error::Result;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizedExtractor;

impl OptimizedExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FingerprintExtractor for OptimizedExtractor {
    fn name(&self) -> &'static str {
        "optimized"
    }

    fn extract(&self, buffer: &AudioBuffer, params: &ExtractionParams) -> Result<FingerprintRecord> {
        params.validate()?;
        let started = Instant::now();

        let samples = buffer.samples();
        let n_fft = params.n_fft();
        let hop = params.hop_length();
        let bins = params.bin_count();
        let frames = spectral::frame_count(samples.len(), hop);

        let window = spectral::hann_window(n_fft);
        let layout = BandLayout::new(n_fft, buffer.sample_rate());
        let fft = FftPlanner::new().plan_fft_forward(n_fft);
        let scratch_len = fft.get_inplace_scratch_len();

        let frame_peaks: Vec<Vec<Peak>> = (0..frames)
            .into_par_iter()
            .map_init(
                || {
                    (
                        vec![Complex::new(0.0, 0.0); n_fft],
                        vec![Complex::new(0.0, 0.0); scratch_len],
                        vec![0.0f64; bins],
                    )
                },
                |(frame, scratch, magnitudes), i| {
                    fill_centered_frame(samples, i * hop, &window, frame);
                    fft.process_with_scratch(frame, scratch);
                    for (m, c) in magnitudes.iter_mut().zip(frame.iter()) {
                        *m = c.norm();
                    }
                    spectral::frame_peaks(magnitudes, &layout)
                },
            )
            .collect();

        let record = spectral::assemble_record(frame_peaks, buffer, params);

        debug!(
            extractor = "optimized",
            frames = record.compact().time_bins(),
            peaks = record.peak_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted fingerprint"
        );

        Ok(record)
    }
}

/// Window the frame starting at `padded_start` of the virtually centred
/// signal (`n_fft / 2` zeros on each side) into `out`.
fn fill_centered_frame(
    samples: &[f64],
    padded_start: usize,
    window: &[f64],
    out: &mut [Complex<f64>],
) {
    let pad = window.len() / 2;
    for (j, (slot, &w)) in out.iter_mut().zip(window.iter()).enumerate() {
        let padded_index = padded_start + j;
        *slot = match padded_index.checked_sub(pad).and_then(|k| samples.get(k)) {
            Some(&s) => Complex::new(s * w, 0.0),
            None => Complex::new(0.0, 0.0),
        };
    }
}
