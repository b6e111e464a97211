//! Compressed audio → mono PCM, via symphonia.
//!
//! This sits in front of the fingerprinting core and is only used by the
//! command-line tool. The core itself never decodes, fetches or resamples
//! anything; it takes an [`AudioBuffer`] as given.

use crate::audio::AudioBuffer;
use crate::error::{FingerprintError, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// File extensions the scanner picks up. Each maps to a container and
/// codec enabled in the symphonia build.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["flac", "wav", "wave", "mp3", "m4a", "mp4", "aac", "ogg"];

/// Decode `data` to a mono buffer at the stream's native rate.
///
/// Channels are averaged. With `max_seconds` set, decoding stops once that
/// much audio was produced and the buffer is cut to exactly that length.
pub fn decode_audio(data: &[u8], max_seconds: Option<f64>) -> Result<AudioBuffer> {
    let cursor = std::io::Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    // No hint: let symphonia detect the container from the bytes
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FingerprintError::Decode(format!("unrecognized format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| FingerprintError::Decode("no audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| FingerprintError::Decode("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FingerprintError::Decode(format!("unsupported codec: {}", e)))?;

    let max_samples = match max_seconds {
        Some(s) if s.is_finite() && s > 0.0 => Some((s * sample_rate as f64) as usize),
        Some(s) => {
            return Err(FingerprintError::invalid(format!(
                "max_seconds must be > 0, got {}",
                s
            )))
        }
        None => None,
    };

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) => break, // end of stream
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(FingerprintError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => {
                skipped_packets += 1;
                continue;
            }
            Err(e) => return Err(FingerprintError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count().max(1);
        let needed = decoded.capacity();
        let fits = sample_buf
            .as_ref()
            .map_or(false, |buf| buf.capacity() >= needed * channel_count);
        if !fits {
            sample_buf = Some(SampleBuffer::new(needed as u64, spec));
        }

        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            for chunk in buf.samples().chunks(channel_count) {
                samples.push(chunk.iter().map(|&s| s as f64).sum::<f64>() / channel_count as f64);
            }
        }

        if let Some(max) = max_samples {
            if samples.len() >= max {
                samples.truncate(max);
                break;
            }
        }
    }

    if skipped_packets > 0 {
        debug!(skipped_packets, "skipped undecodable packets");
    }
    if samples.is_empty() {
        return Err(FingerprintError::Decode("stream contains no audio".to_string()));
    }

    AudioBuffer::new(samples, sample_rate)
}

/// Whether `path` has one of [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
