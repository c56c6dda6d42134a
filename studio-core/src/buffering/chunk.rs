//! Typed audio containers passed between the capture, codec, transport and
//! playback stages.

use serde::{Deserialize, Serialize};

/// A contiguous block of interleaved PCM16 samples at a known sample rate.
///
/// Immutable once built; stages take it by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioChunk {
    /// Mono chunk.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self::with_channels(samples, sample_rate, 1)
    }

    pub fn with_channels(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() / self.channels as usize;
        frames as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// MIME descriptor for raw PCM16 at `rate` Hz, e.g. `audio/pcm;rate=16000`.
pub fn pcm_mime(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

/// Base64 text of a chunk's little-endian bytes plus its MIME descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFrame {
    pub mime_type: String,
    pub data: String,
}

impl EncodedFrame {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Deinterleaved float audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiChannelBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl MultiChannelBuffer {
    /// All channels are expected to have the same length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, idx: usize) -> &[f32] {
        &self.channels[idx]
    }

    /// Sample frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}
