//! Straightforward extractor: full spectrogram first, peaks second.
//!
//! Allocates a fresh buffer per frame and runs sequentially. Slow, but
//! every step maps one-to-one onto the algorithm description, which makes
//! it the yardstick the optimized path is tested against.

use super::spectral::{self, BandLayout};
use super::{ExtractionParams, FingerprintExtractor, FingerprintRecord, Peak};
use crate::audio::AudioBuffer;
use crate::error::Result;
use rustfft::{num_complex::Complex, FftPlanner};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceExtractor;

impl ReferenceExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FingerprintExtractor for ReferenceExtractor {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn extract(&self, buffer: &AudioBuffer, params: &ExtractionParams) -> Result<FingerprintRecord> {
        params.validate()?;
        let started = Instant::now();

        let spectrogram = magnitude_spectrogram(buffer.samples(), params);
        let layout = BandLayout::new(params.n_fft(), buffer.sample_rate());

        let frame_peaks: Vec<Vec<Peak>> = spectrogram
            .iter()
            .map(|spectrum| spectral::frame_peaks(spectrum, &layout))
            .collect();

        let record = spectral::assemble_record(frame_peaks, buffer, params);

        debug!(
            extractor = "reference",
            frames = record.compact().time_bins(),
            peaks = record.peak_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted fingerprint"
        );

        Ok(record)
    }
}

/// `|STFT|` of the centred, zero-padded signal: one row per frame,
/// `n_fft / 2 + 1` bins per row.
pub fn magnitude_spectrogram(samples: &[f64], params: &ExtractionParams) -> Vec<Vec<f64>> {
    let n_fft = params.n_fft();
    let hop = params.hop_length();
    let frames = spectral::frame_count(samples.len(), hop);
    if frames == 0 {
        return Vec::new();
    }

    let pad = n_fft / 2;
    let mut padded = vec![0.0f64; samples.len() + n_fft];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    let window = spectral::hann_window(n_fft);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut spectrogram = Vec::with_capacity(frames);
    for i in 0..frames {
        let start = i * hop;
        let mut frame: Vec<Complex<f64>> = padded[start..start + n_fft]
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        fft.process(&mut frame);

        spectrogram.push(frame[..=n_fft / 2].iter().map(|c| c.norm()).collect());
    }

    spectrogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::BAND_COUNT;

    fn sine(freq: f64, seconds: f64, sample_rate: u32) -> AudioBuffer {
        let n = (seconds * sample_rate as f64) as usize;
        let samples = (0..n)
            .map(|i| 0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin())
            .collect();
        AudioBuffer::new(samples, sample_rate).unwrap()
    }

    // ==========================================================================
    // SPECTROGRAM TESTS
    // ==========================================================================

    #[test]
    fn test_spectrogram_dimensions() {
        let params = ExtractionParams::new(1024, 256).unwrap();
        let samples = vec![0.1; 4000];
        let spec = magnitude_spectrogram(&samples, &params);

        assert_eq!(spec.len(), 1 + 4000 / 256);
        assert!(spec.iter().all(|row| row.len() == 513));
    }

    #[test]
    fn test_spectrogram_sine_peak_bin() {
        // 1000 Hz at 16 kHz with n_fft 1024 lands exactly on bin 64
        let params = ExtractionParams::new(1024, 512).unwrap();
        let buffer = sine(1000.0, 1.0, 16000);
        let spec = magnitude_spectrogram(buffer.samples(), &params);

        let middle = &spec[spec.len() / 2];
        let (argmax, _) = middle
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        assert_eq!(argmax, 64);
    }

    #[test]
    fn test_spectrogram_empty() {
        let params = ExtractionParams::default();
        assert!(magnitude_spectrogram(&[], &params).is_empty());
    }

    // ==========================================================================
    // EXTRACTION TESTS
    // ==========================================================================

    #[test]
    fn test_sine_fingerprint() {
        let params = ExtractionParams::default();
        let buffer = sine(440.0, 2.0, 22050);
        let record = ReferenceExtractor::new().extract(&buffer, &params).unwrap();

        assert_eq!(record.compact().time_bins(), 1 + 44100 / 512);
        assert!(!record.compact().is_silent());
        assert!(record.peak_count() > 0);
        assert!(record.confidence() > 0.0);
        assert_eq!(record.n_fft(), 2048);
        assert_eq!(record.hop_length(), 512);

        // The strongest peak of every frame is the 440 Hz tone in band 1
        for frame in record.frames().unwrap() {
            let strongest = frame
                .peaks
                .iter()
                .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
                .unwrap();
            assert_eq!(strongest.band, 1);
            assert!((40..=42).contains(&strongest.bin), "bin {}", strongest.bin);
        }
    }

    #[test]
    fn test_silence_gives_zero_vector() {
        let params = ExtractionParams::default();
        let buffer = AudioBuffer::new(vec![0.0; 22050], 22050).unwrap();
        let record = ReferenceExtractor::new().extract(&buffer, &params).unwrap();

        assert_eq!(record.compact().len(), (1 + 22050 / 512) * BAND_COUNT);
        assert!(record.compact().is_silent());
        assert_eq!(record.peak_count(), 0);
        assert_eq!(record.confidence(), 0.0);
        assert!(record.frames().unwrap().is_empty());
    }

    #[test]
    fn test_empty_buffer() {
        let params = ExtractionParams::default();
        let buffer = AudioBuffer::new(Vec::new(), 44100).unwrap();
        let record = ReferenceExtractor::new().extract(&buffer, &params).unwrap();

        assert!(record.compact().is_empty());
        assert_eq!(record.duration(), 0.0);
        assert_eq!(record.hash().len(), 64);
    }

    #[test]
    fn test_repeatable() {
        let params = ExtractionParams::new(1024, 256).unwrap();
        let buffer = sine(660.0, 1.0, 22050);
        let a = ReferenceExtractor::new().extract(&buffer, &params).unwrap();
        let b = ReferenceExtractor::new().extract(&buffer, &params).unwrap();

        assert_eq!(a.compact(), b.compact());
        assert_eq!(a.hash(), b.hash());
    }
}
