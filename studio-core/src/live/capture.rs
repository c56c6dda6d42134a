//! Outbound capture pipeline: one microphone window in, one encoded frame out.
//!
//! Stateless apart from the wire rate; windows are encoded and handed to the
//! transport as they arrive.

use crate::buffering::chunk::{pcm_mime, AudioChunk, EncodedFrame};
use crate::codec::{encode_bytes_to_text, float_to_pcm16, pcm16_to_bytes};

#[derive(Debug, Clone)]
pub struct CapturePipeline {
    sample_rate: u32,
    mime_type: String,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            mime_type: pcm_mime(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Quantise a window of mono floats into a PCM16 chunk.
    pub fn chunk(&self, window: &[f32]) -> AudioChunk {
        AudioChunk::new(float_to_pcm16(window), self.sample_rate)
    }

    /// Little-endian bytes of the chunk as base64, tagged with the PCM MIME type.
    pub fn encode(&self, chunk: &AudioChunk) -> EncodedFrame {
        let bytes = pcm16_to_bytes(chunk.samples());
        EncodedFrame::new(self.mime_type.clone(), encode_bytes_to_text(&bytes))
    }

    pub fn process(&self, window: &[f32]) -> EncodedFrame {
        self.encode(&self.chunk(window))
    }
}
