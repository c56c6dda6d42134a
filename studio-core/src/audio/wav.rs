//! WAV file helpers for recorded and synthesised speech.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, StudioError};

/// Write a PCM16 chunk as a WAV file.
pub fn write_wav(path: &Path, chunk: &AudioChunk) -> Result<()> {
    let spec = WavSpec {
        channels: chunk.channels(),
        sample_rate: chunk.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in chunk.samples() {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

/// Read a WAV file into a PCM16 chunk. Float files are quantised.
pub fn read_wav(path: &Path) -> Result<AudioChunk> {
    let mut reader = WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?,
        (SampleFormat::Int, bits) if bits <= 32 => reader
            .samples::<i32>()
            .map(|s| s.map(|v| rescale_to_16(v, bits)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?,
        (SampleFormat::Float, _) => {
            let floats = reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(wav_error)?;
            crate::codec::float_to_pcm16(&floats)
        }
        (format, bits) => {
            return Err(StudioError::MalformedEncoding(format!(
                "unsupported WAV format {format:?} at {bits} bits"
            )))
        }
    };
    Ok(AudioChunk::with_channels(samples, spec.sample_rate, spec.channels))
}

fn rescale_to_16(sample: i32, bits: u16) -> i16 {
    if bits >= 16 {
        (sample >> (bits - 16)) as i16
    } else {
        (sample << (16 - bits)) as i16
    }
}

fn wav_error(err: hound::Error) -> StudioError {
    match err {
        hound::Error::IoError(e) => StudioError::Io(e),
        other => StudioError::MalformedEncoding(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trip_preserves_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let chunk = AudioChunk::new(vec![0, 1000, -1000, i16::MAX, i16::MIN], 24_000);
        write_wav(&path, &chunk).unwrap();
        let back = read_wav(&path).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn wider_samples_are_scaled_down() {
        assert_eq!(rescale_to_16(0x7fff_ff, 24), 0x7fff);
        assert_eq!(rescale_to_16(-128, 8), i16::MIN);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_wav(Path::new("/nonexistent/studio.wav")).unwrap_err();
        assert!(matches!(err, StudioError::Io(_)));
    }
}
