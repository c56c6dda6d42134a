//! Media codec helpers.
//!
//! Pure, stateless conversions between the representations audio passes through:
//!
//! ```text
//! f32 samples ⇄ PCM16 samples ⇄ little-endian bytes ⇄ base64 text
//! ```
//!
//! plus splitting an interleaved PCM stream into per-channel buffers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::buffering::chunk::MultiChannelBuffer;
use crate::error::{Result, StudioError};

/// Scale between a PCM16 sample and its float value.
const PCM16_SCALE: f32 = 32768.0;

/// Encode raw bytes as standard (padded) base64.
pub fn encode_bytes_to_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard base64 text.
///
/// # Errors
/// `StudioError::MalformedEncoding` when the text contains characters outside the
/// base64 alphabet or is incorrectly padded.
pub fn decode_text_to_bytes(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| StudioError::MalformedEncoding(e.to_string()))
}

/// Map PCM16 samples to floats in `[-1.0, 1.0)`.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect()
}

/// Map floats back to PCM16.
///
/// Values outside `[-1.0, 1.0)` are clamped to the representable range instead
/// of wrapping; NaN becomes silence.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&x| float_sample_to_pcm16(x)).collect()
}

#[inline]
fn float_sample_to_pcm16(x: f32) -> i16 {
    if x.is_nan() {
        return 0;
    }
    (x * PCM16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Pack PCM16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Unpack little-endian bytes into PCM16 samples.
///
/// # Errors
/// `StudioError::MalformedEncoding` if the byte count is odd.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(StudioError::MalformedEncoding(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Split an interleaved PCM16 stream into one float array per channel.
///
/// # Errors
/// `StudioError::ChannelMismatch` when `samples.len()` is not a multiple of
/// `num_channels` (or `num_channels` is zero).
pub fn deinterleave(
    samples: &[i16],
    num_channels: usize,
    sample_rate: u32,
) -> Result<MultiChannelBuffer> {
    if num_channels == 0 || samples.len() % num_channels != 0 {
        return Err(StudioError::ChannelMismatch {
            samples: samples.len(),
            channels: num_channels,
        });
    }

    let frames = samples.len() / num_channels;
    let mut channels = vec![Vec::with_capacity(frames); num_channels];
    for frame in samples.chunks_exact(num_channels) {
        for (channel, &s) in channels.iter_mut().zip(frame) {
            channel.push(s as f32 / PCM16_SCALE);
        }
    }

    Ok(MultiChannelBuffer::new(channels, sample_rate))
}

/// Base64 text → PCM16 LE bytes → deinterleaved playable buffer.
pub fn decode_pcm16_text(
    text: &str,
    num_channels: usize,
    sample_rate: u32,
) -> Result<MultiChannelBuffer> {
    let bytes = decode_text_to_bytes(text)?;
    let samples = bytes_to_pcm16(&bytes)?;
    deinterleave(&samples, num_channels, sample_rate)
}

/// Strip a `data:<mime>;base64,` prefix if present, returning the payload.
///
/// Raw base64 passes through unchanged.
pub fn strip_data_url(input: &str) -> &str {
    if input.starts_with("data:") {
        if let Some((_, payload)) = input.split_once(',') {
            return payload;
        }
    }
    input
}

/// Build a `data:` URL from a MIME type and base64 payload.
pub fn to_data_url(mime_type: &str, data: &str) -> String {
    format!("data:{mime_type};base64,{data}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn pcm16_round_trip_within_one_step() {
        let samples: Vec<i16> = (i16::MIN..=i16::MAX).step_by(97).collect();
        let back = float_to_pcm16(&pcm16_to_float(&samples));
        for (a, b) in samples.iter().zip(&back) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{a} -> {b}");
        }
    }

    #[test]
    fn pcm16_extremes_are_exact() {
        let extremes = [i16::MIN, i16::MAX];
        let floats = pcm16_to_float(&extremes);
        assert_abs_diff_eq!(floats[0], -1.0);
        assert_abs_diff_eq!(floats[1], 32767.0 / 32768.0);
        assert_eq!(float_to_pcm16(&floats), vec![-32768, 32767]);
    }

    #[test]
    fn out_of_range_floats_are_clamped() {
        let out = float_to_pcm16(&[1.0, 1.5, -1.0, -3.0, f32::NAN, f32::INFINITY]);
        assert_eq!(out, vec![32767, 32767, -32768, -32768, 0, 32767]);
    }

    #[test]
    fn base64_round_trip_arbitrary_bytes() {
        let bytes: Vec<u8> = (0..=255u8).chain([0, 0, 255]).collect();
        let text = encode_bytes_to_text(&bytes);
        assert_eq!(decode_text_to_bytes(&text).unwrap(), bytes);
        assert_eq!(decode_text_to_bytes("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_characters_outside_alphabet() {
        let err = decode_text_to_bytes("AAA*").unwrap_err();
        assert!(matches!(err, StudioError::MalformedEncoding(_)));
    }

    #[test]
    fn bytes_are_little_endian() {
        assert_eq!(pcm16_to_bytes(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(bytes_to_pcm16(&[0x01, 0x00, 0xFE, 0xFF]).unwrap(), vec![1, -2]);
        assert!(bytes_to_pcm16(&[0x01]).is_err());
    }

    #[test]
    fn deinterleave_splits_channels() {
        let buf = deinterleave(&[0, 16384, -16384, 8192], 2, 24_000).unwrap();
        assert_eq!(buf.num_channels(), 2);
        assert_eq!(buf.frames(), 2);
        assert_eq!(buf.channel(0), &[0.0, -0.5]);
        assert_eq!(buf.channel(1), &[0.5, 0.25]);
    }

    #[test]
    fn deinterleave_rejects_uneven_channel_count() {
        let err = deinterleave(&[1, 2, 3], 2, 24_000).unwrap_err();
        assert!(matches!(
            err,
            StudioError::ChannelMismatch {
                samples: 3,
                channels: 2
            }
        ));
        assert!(deinterleave(&[1, 2], 0, 24_000).is_err());
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
        assert_eq!(to_data_url("image/png", "QUJD"), "data:image/png;base64,QUJD");
    }
}
