//! Versioned binary encoding of [`FingerprintRecord`].
//!
//! Every field has a fixed position and width. Decoding never trusts a
//! declared length without checking it against the bytes actually left,
//! and rejects anything it cannot fully account for.
//!
//! ```text
//! Offset | Field        | Type
//! -------|--------------|--------------------------------------------
//!  0     | magic        | b"SNPF"
//!  4     | version      | u8 (= 1)
//!  5     | sample_rate  | u32
//!  9     | n_fft        | u32
//! 13     | hop_length   | u32
//! 17     | duration     | f64
//! 25     | confidence   | f64
//! 33     | peak_count   | u64
//! 41     | hash         | 64 bytes, lowercase hex
//! 105    | time_bins    | u32
//! 109    | band_count   | u8 (= 6)
//! 110    | compact      | f64 × time_bins·band_count
//!  ...   | has_frames   | u8 (0 or 1)
//!  ...   | frame_count  | u32            (only if has_frames)
//!  ...   | frames       | per frame: time_offset f64, peak_len u8,
//!        |              | per peak: frequency f64, bin u32,
//!        |              | magnitude f64, band u8
//! ```
//!
//! All integers and floats are little-endian.

use crate::error::{FingerprintError, Result};
use crate::extractor::spectral::fingerprint_hash;
use crate::extractor::{
    CompactFingerprint, ExtractionParams, FingerprintFrame, FingerprintRecord, Peak, BAND_COUNT,
    PEAKS_PER_BAND,
};

pub const MAGIC: &[u8; 4] = b"SNPF";
pub const FORMAT_VERSION: u8 = 1;

const HASH_LEN: usize = 64;
const PEAK_SIZE: usize = 8 + 4 + 8 + 1;
const MAX_PEAKS_PER_FRAME: usize = BAND_COUNT * PEAKS_PER_BAND;

/// Serialize `record`, frames included when present.
///
/// Fails when a length or index does not fit its fixed-width field.
pub fn encode(record: &FingerprintRecord) -> Result<Vec<u8>> {
    let compact = record.compact();
    let mut out = Vec::with_capacity(111 + compact.len() * 8);

    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&record.sample_rate().to_le_bytes());
    out.extend_from_slice(&field_u32(record.n_fft(), "n_fft")?.to_le_bytes());
    out.extend_from_slice(&field_u32(record.hop_length(), "hop_length")?.to_le_bytes());
    out.extend_from_slice(&record.duration().to_le_bytes());
    out.extend_from_slice(&record.confidence().to_le_bytes());
    out.extend_from_slice(&(record.peak_count() as u64).to_le_bytes());
    out.extend_from_slice(record.hash().as_bytes());
    out.extend_from_slice(&field_u32(compact.time_bins(), "time_bins")?.to_le_bytes());
    out.push(BAND_COUNT as u8);
    for v in compact.values() {
        out.extend_from_slice(&v.to_le_bytes());
    }

    match record.frames() {
        None => out.push(0),
        Some(frames) => {
            out.push(1);
            out.extend_from_slice(&field_u32(frames.len(), "frame_count")?.to_le_bytes());
            for frame in frames {
                out.extend_from_slice(&frame.time_offset.to_le_bytes());
                out.push(field_u8(frame.peaks.len(), "peak_len")?);
                for peak in &frame.peaks {
                    out.extend_from_slice(&peak.frequency.to_le_bytes());
                    out.extend_from_slice(&field_u32(peak.bin, "bin")?.to_le_bytes());
                    out.extend_from_slice(&peak.magnitude.to_le_bytes());
                    out.push(field_u8(peak.band, "band")?);
                }
            }
        }
    }

    Ok(out)
}

fn field_u32(value: usize, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed(format!("{} = {} does not fit in u32", field, value)))
}

fn field_u8(value: usize, field: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| malformed(format!("{} = {} does not fit in u8", field, value)))
}

/// Parse and validate bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<FingerprintRecord> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != MAGIC {
        return Err(malformed("bad magic"));
    }
    let version = r.u8()?;
    if version != FORMAT_VERSION {
        return Err(malformed(format!("unsupported format version {}", version)));
    }

    let sample_rate = r.u32()?;
    if sample_rate == 0 {
        return Err(malformed("sample_rate is 0"));
    }
    let n_fft = r.u32()? as usize;
    let hop_length = r.u32()? as usize;
    ExtractionParams::new(n_fft, hop_length)
        .map_err(|e| malformed(format!("bad extraction parameters: {}", e)))?;

    let duration = r.non_negative("duration")?;
    let confidence = r.non_negative("confidence")?;
    let peak_count = usize::try_from(r.u64()?).map_err(|_| malformed("peak_count overflows"))?;

    let hash_bytes = r.take(HASH_LEN)?;
    if !hash_bytes
        .iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
    {
        return Err(malformed("hash is not lowercase hex"));
    }
    let hash = String::from_utf8_lossy(hash_bytes).into_owned();

    let time_bins = r.u32()? as usize;
    let band_count = r.u8()? as usize;
    if band_count != BAND_COUNT {
        return Err(malformed(format!("band_count {} (expected {})", band_count, BAND_COUNT)));
    }
    let value_count = time_bins
        .checked_mul(BAND_COUNT)
        .ok_or_else(|| malformed("time_bins overflows"))?;
    r.ensure(value_count.saturating_mul(8), "compact vector")?;
    let mut values = Vec::with_capacity(value_count);
    for _ in 0..value_count {
        let v = r.f64()?;
        if !(0.0..=1.0).contains(&v) {
            return Err(malformed(format!("compact value {} outside [0, 1]", v)));
        }
        values.push(v);
    }
    let compact = CompactFingerprint::from_parts(values, time_bins);
    if fingerprint_hash(&compact) != hash {
        return Err(malformed("hash does not match compact vector"));
    }

    let frames = match r.u8()? {
        0 => None,
        1 => Some(read_frames(&mut r, time_bins, peak_count)?),
        other => return Err(malformed(format!("bad frames flag {}", other))),
    };

    if r.remaining() != 0 {
        return Err(malformed(format!("{} trailing bytes", r.remaining())));
    }

    Ok(FingerprintRecord::from_parts(
        frames,
        compact,
        hash,
        confidence,
        peak_count,
        duration,
        sample_rate,
        n_fft,
        hop_length,
    ))
}

fn read_frames(r: &mut Reader<'_>, time_bins: usize, peak_count: usize) -> Result<Vec<FingerprintFrame>> {
    let frame_count = r.u32()? as usize;
    if frame_count > time_bins {
        return Err(malformed(format!(
            "{} frames but only {} time bins",
            frame_count, time_bins
        )));
    }
    // Smallest possible frame: time offset plus an empty peak list.
    r.ensure(frame_count.saturating_mul(9), "frames")?;

    let mut frames = Vec::with_capacity(frame_count);
    let mut total_peaks = 0usize;
    for _ in 0..frame_count {
        let time_offset = r.non_negative("time_offset")?;
        let peak_len = r.u8()? as usize;
        if peak_len == 0 || peak_len > MAX_PEAKS_PER_FRAME {
            return Err(malformed(format!("frame with {} peaks", peak_len)));
        }
        r.ensure(peak_len * PEAK_SIZE, "peaks")?;

        let mut peaks = Vec::with_capacity(peak_len);
        for _ in 0..peak_len {
            let frequency = r.non_negative("frequency")?;
            let bin = r.u32()? as usize;
            let magnitude = r.non_negative("magnitude")?;
            let band = r.u8()? as usize;
            if band >= BAND_COUNT {
                return Err(malformed(format!("peak band {} out of range", band)));
            }
            peaks.push(Peak {
                frequency,
                bin,
                magnitude,
                band,
            });
        }
        total_peaks += peak_len;
        frames.push(FingerprintFrame { time_offset, peaks });
    }

    if total_peaks != peak_count {
        return Err(malformed(format!(
            "frames hold {} peaks, header says {}",
            total_peaks, peak_count
        )));
    }
    Ok(frames)
}

fn malformed(msg: impl Into<String>) -> FingerprintError {
    FingerprintError::InvalidFormat(msg.into())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn ensure(&self, n: usize, what: &str) -> Result<()> {
        if n > self.remaining() {
            return Err(malformed(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n, "record")?;
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn non_negative(&mut self, field: &str) -> Result<f64> {
        let v = self.f64()?;
        if !v.is_finite() || v < 0.0 {
            return Err(malformed(format!("{} must be finite and >= 0, got {}", field, v)));
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::extractor::extract;

    fn record() -> FingerprintRecord {
        let samples = (0..20_000)
            .map(|i| {
                let t = i as f64 / 22050.0;
                0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()
                    + 0.2 * (2.0 * std::f64::consts::PI * 2500.0 * t).sin()
            })
            .collect();
        let buffer = AudioBuffer::new(samples, 22050).unwrap();
        extract(&buffer, &ExtractionParams::new(1024, 512).unwrap()).unwrap()
    }

    fn is_invalid_format(result: Result<FingerprintRecord>) -> bool {
        matches!(result, Err(FingerprintError::InvalidFormat(_)))
    }

    // ==========================================================================
    // ROUND TRIP TESTS
    // ==========================================================================

    #[test]
    fn test_round_trip_with_frames() {
        let original = record();
        assert!(original.peak_count() > 0);
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_round_trip_without_frames() {
        let original = record().without_frames();
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert!(decoded.frames().is_none());
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&record()).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(bytes[4], FORMAT_VERSION);
        assert_eq!(u32::from_le_bytes(bytes[5..9].try_into().unwrap()), 22050);
        assert_eq!(u32::from_le_bytes(bytes[9..13].try_into().unwrap()), 1024);
        assert_eq!(bytes[109], BAND_COUNT as u8);
    }

    // ==========================================================================
    // REJECTION TESTS
    // ==========================================================================
    //
    // Stored records may come from disk or the network. Any damage must be
    // reported as InvalidFormat, never decoded on a best-effort basis.
    // ==========================================================================

    #[test]
    fn test_rejects_every_truncation() {
        let bytes = encode(&record().without_frames()).unwrap();
        for len in 0..bytes.len() {
            assert!(is_invalid_format(decode(&bytes[..len])), "accepted {} bytes", len);
        }
    }

    #[test]
    fn test_rejects_truncated_frames() {
        let bytes = encode(&record()).unwrap();
        assert!(is_invalid_format(decode(&bytes[..bytes.len() - 1])));
        assert!(is_invalid_format(decode(&bytes[..bytes.len() - PEAK_SIZE])));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = encode(&record()).unwrap();
        bytes.push(0);
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = encode(&record()).unwrap();
        bytes[0] = b'X';
        assert!(is_invalid_format(decode(&bytes)));

        let mut bytes = encode(&record()).unwrap();
        bytes[4] = 2;
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_invalid_params() {
        let mut bytes = encode(&record()).unwrap();
        bytes[9..13].copy_from_slice(&1000u32.to_le_bytes());
        assert!(is_invalid_format(decode(&bytes)));

        let mut bytes = encode(&record()).unwrap();
        bytes[5..9].copy_from_slice(&0u32.to_le_bytes());
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_tampered_hash() {
        let mut bytes = encode(&record()).unwrap();
        bytes[41] = if bytes[41] == b'0' { b'1' } else { b'0' };
        assert!(is_invalid_format(decode(&bytes)));

        let mut bytes = encode(&record()).unwrap();
        bytes[41] = b'G';
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_tampered_compact() {
        let mut bytes = encode(&record().without_frames()).unwrap();
        bytes[110..118].copy_from_slice(&2.0f64.to_le_bytes());
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_huge_declared_length() {
        let mut bytes = encode(&record().without_frames()).unwrap();
        bytes[105..109].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_bad_frames_flag() {
        let mut bytes = encode(&record().without_frames()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 7;
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_rejects_peak_count_mismatch() {
        let mut bytes = encode(&record()).unwrap();
        let count = u64::from_le_bytes(bytes[33..41].try_into().unwrap());
        bytes[33..41].copy_from_slice(&(count + 1).to_le_bytes());
        assert!(is_invalid_format(decode(&bytes)));
    }

    #[test]
    fn test_field_width_checks() {
        assert_eq!(field_u32(4096, "n_fft").unwrap(), 4096);
        assert_eq!(field_u8(18, "peak_len").unwrap(), 18);
        assert!(matches!(field_u8(256, "peak_len"), Err(FingerprintError::InvalidFormat(_))));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_length_not_truncated() {
        let too_big = u32::MAX as usize + 1;
        match field_u32(too_big, "time_bins") {
            Err(FingerprintError::InvalidFormat(msg)) => assert!(msg.contains("time_bins")),
            other => panic!("expected format error, got {:?}", other),
        }
    }
}
