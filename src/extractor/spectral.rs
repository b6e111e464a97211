//! Per-frame spectral arithmetic shared by every extractor
//!
//! Anything that influences the compact vector or the hash lives here, so
//! the reference and optimized strategies cannot drift apart: they differ
//! only in how frames are scheduled and where buffers live.
//!
//! # Framing
//!
//! Frames are centred: the signal is conceptually zero-padded by
//! `n_fft / 2` samples on both sides, and frame `i` starts at padded
//! offset `i · hop_length`. A buffer of `len` samples yields
//! `1 + len / hop_length` frames (none for an empty buffer).
//!
//! # Peak Picking
//!
//! For each band slice of a magnitude spectrum:
//!
//! 1. local maxima (`x[i-1] < x[i] >= x[i+1]`, plateaus resolved to their
//!    midpoint, slice edges excluded)
//! 2. strictly above `mean + 2·stddev` of the slice
//! 3. greedy suppression: strongest first, anything closer than
//!    [`MIN_PEAK_DISTANCE`] bins to a kept peak is dropped
//! 4. the top [`PEAKS_PER_BAND`] by magnitude
//!
//! Equal magnitudes keep first-encountered (lowest bin) order throughout.

use super::{
    CompactFingerprint, ExtractionParams, FingerprintFrame, FingerprintRecord, Peak, BANDS,
    BAND_COUNT, MIN_PEAK_DISTANCE, PEAKS_PER_BAND,
};
use crate::audio::AudioBuffer;
use sha2::{Digest, Sha256};

const THRESHOLD_STDDEVS: f64 = 2.0;

/// Periodic Hann window: `w[n] = 0.5 - 0.5·cos(2πn/N)`.
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos())
        .collect()
}

/// Number of centred STFT frames for a buffer of `len` samples.
pub fn frame_count(len: usize, hop_length: usize) -> usize {
    if len == 0 {
        0
    } else {
        1 + len / hop_length
    }
}

/// Bin ranges `[start, end)` of the fixed bands for one sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandLayout {
    ranges: [(usize, usize); BAND_COUNT],
    sample_rate: u32,
    n_fft: usize,
}

impl BandLayout {
    pub fn new(n_fft: usize, sample_rate: u32) -> Self {
        let bins = n_fft / 2 + 1;
        let to_bin = |hz: u32| -> usize {
            // floor(hz * n_fft / sample_rate) in exact integer arithmetic
            let bin = (hz as u64 * n_fft as u64) / sample_rate as u64;
            (bin as usize).min(bins)
        };

        let mut ranges = [(0, 0); BAND_COUNT];
        for (slot, &(low, high)) in ranges.iter_mut().zip(BANDS.iter()) {
            *slot = (to_bin(low), to_bin(high));
        }

        Self {
            ranges,
            sample_rate,
            n_fft,
        }
    }

    pub fn ranges(&self) -> &[(usize, usize); BAND_COUNT] {
        &self.ranges
    }

    fn bin_frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.sample_rate as f64 / self.n_fft as f64
    }
}

/// Peaks of one magnitude spectrum, band by band.
pub fn frame_peaks(spectrum: &[f64], layout: &BandLayout) -> Vec<Peak> {
    let mut peaks = Vec::new();

    for (band, &(start, end)) in layout.ranges().iter().enumerate() {
        let end = end.min(spectrum.len());
        if start >= end {
            continue;
        }

        for local in pick_band_peaks(&spectrum[start..end]) {
            let bin = start + local;
            peaks.push(Peak {
                frequency: layout.bin_frequency(bin),
                bin,
                magnitude: spectrum[bin],
                band,
            });
        }
    }

    peaks
}

/// Indices into `slice` of the selected peaks, magnitude-descending.
pub fn pick_band_peaks(slice: &[f64]) -> Vec<usize> {
    if slice.len() < 3 {
        return Vec::new();
    }

    let threshold = adaptive_threshold(slice);
    let candidates: Vec<usize> = local_maxima(slice)
        .into_iter()
        .filter(|&i| slice[i] > threshold)
        .collect();

    let mut kept = suppress_close_peaks(slice, &candidates, MIN_PEAK_DISTANCE);
    sort_by_magnitude(slice, &mut kept);
    kept.truncate(PEAKS_PER_BAND);
    kept
}

/// `mean + 2·stddev` (population stddev, two-pass).
pub fn adaptive_threshold(slice: &[f64]) -> f64 {
    let n = slice.len() as f64;
    let mean = slice.iter().sum::<f64>() / n;
    let variance = slice.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / n;
    mean + THRESHOLD_STDDEVS * variance.sqrt()
}

/// Local maxima excluding the edges. Flat tops count once, at their midpoint.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }

    peaks
}

/// Greedy distance suppression. `candidates` must be ascending.
fn suppress_close_peaks(x: &[f64], candidates: &[usize], distance: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| x[candidates[b]].total_cmp(&x[candidates[a]]));

    let mut keep = vec![true; candidates.len()];
    for &j in &order {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && candidates[j] - candidates[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < candidates.len() && candidates[k] - candidates[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    candidates
        .iter()
        .zip(keep)
        .filter_map(|(&c, k)| k.then_some(c))
        .collect()
}

// Stable: equal magnitudes stay in bin order.
fn sort_by_magnitude(x: &[f64], indices: &mut [usize]) {
    indices.sort_by(|&a, &b| x[b].total_cmp(&x[a]));
}

/// Hex SHA-256 over the little-endian `i32` quantization of `compact`.
pub fn fingerprint_hash(compact: &CompactFingerprint) -> String {
    let mut hasher = Sha256::new();
    for q in compact.quantized() {
        hasher.update(q.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Build the record from per-frame peaks (one entry per STFT frame, in order).
pub fn assemble_record(
    frame_peaks: Vec<Vec<Peak>>,
    buffer: &AudioBuffer,
    params: &ExtractionParams,
) -> FingerprintRecord {
    let time_bins = frame_peaks.len();
    let mut matrix = vec![0.0f64; time_bins * BAND_COUNT];
    let mut frames = Vec::new();
    let mut confidence_sum = 0.0;
    let mut peak_count = 0usize;

    for (t, peaks) in frame_peaks.into_iter().enumerate() {
        if peaks.is_empty() {
            continue;
        }

        for peak in &peaks {
            matrix[t * BAND_COUNT + peak.band] += peak.magnitude;
        }

        let mean = peaks.iter().map(|p| p.magnitude).sum::<f64>() / peaks.len() as f64;
        confidence_sum += mean;
        peak_count += peaks.len();

        frames.push(FingerprintFrame {
            time_offset: (t * params.hop_length()) as f64 / buffer.sample_rate() as f64,
            peaks,
        });
    }

    let max = matrix.iter().cloned().fold(0.0f64, f64::max);
    if max > 0.0 {
        for v in &mut matrix {
            *v /= max;
        }
    }

    let confidence = if frames.is_empty() {
        0.0
    } else {
        confidence_sum / frames.len() as f64
    };

    let compact = CompactFingerprint::from_parts(matrix, time_bins);
    let hash = fingerprint_hash(&compact);

    FingerprintRecord::from_parts(
        Some(frames),
        compact,
        hash,
        confidence,
        peak_count,
        buffer.duration(),
        buffer.sample_rate(),
        params.n_fft(),
        params.hop_length(),
    )
}
