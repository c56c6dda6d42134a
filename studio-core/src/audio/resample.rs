//! Sample-rate conversion using rubato `FastFixedIn` resamplers.
//!
//! Microphones usually run at 44.1 or 48 kHz while the live stream expects 16 kHz
//! mono. `RateConverter` bridges that gap on the framing thread, where allocation
//! is allowed. When the device already runs at the wire rate it is a passthrough.
//!
//! Spoken replies arrive at 24 kHz; [`resample_buffer`] converts each one to the
//! speaker's rate once, before it is scheduled.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::buffering::chunk::MultiChannelBuffer;
use crate::error::{Result, StudioError};

/// Input frames per rubato call when converting whole buffers.
const BUFFER_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Input frames rubato expects per call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `StudioError::DeviceUnavailable` if rubato rejects the rate pair.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| {
                StudioError::DeviceUnavailable(format!(
                    "cannot resample {input_rate} Hz to {output_rate} Hz: {e}"
                ))
            })?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(input_rate, output_rate, chunk_size, "capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning converted output (may be empty while
    /// a full input block is still being accumulated).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let block = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a whole buffer to `output_rate`.
///
/// The resampler's startup delay is trimmed and the tail flushed, so the result
/// holds `ceil(frames * ratio)` frames covering the same duration.
pub fn resample_buffer(buffer: &MultiChannelBuffer, output_rate: u32) -> Result<MultiChannelBuffer> {
    let input_rate = buffer.sample_rate();
    let channels: Vec<&[f32]> = (0..buffer.num_channels()).map(|c| buffer.channel(c)).collect();
    if input_rate == output_rate || buffer.is_empty() {
        let copied = channels.iter().map(|c| c.to_vec()).collect();
        return Ok(MultiChannelBuffer::new(copied, output_rate));
    }

    let convert_error = |e: &dyn std::fmt::Display| {
        StudioError::DeviceUnavailable(format!(
            "cannot resample {input_rate} Hz to {output_rate} Hz: {e}"
        ))
    };
    let ratio = output_rate as f64 / input_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Cubic,
        BUFFER_CHUNK,
        channels.len(),
    )
    .map_err(|e| convert_error(&e))?;

    let frames = buffer.frames();
    let delay = resampler.output_delay();
    let wanted = (frames as f64 * ratio).ceil() as usize;
    let mut out = vec![Vec::with_capacity(wanted + delay); channels.len()];
    let mut pos = 0;

    while out[0].len() < wanted + delay {
        let next = resampler.input_frames_next();
        let converted = if pos + next <= frames {
            let block: Vec<&[f32]> = channels.iter().map(|c| &c[pos..pos + next]).collect();
            pos += next;
            resampler.process(&block, None)
        } else if pos < frames {
            let block: Vec<&[f32]> = channels.iter().map(|c| &c[pos..]).collect();
            pos = frames;
            resampler.process_partial(Some(block.as_slice()), None)
        } else {
            resampler.process_partial::<&[f32]>(None, None)
        }
        .map_err(|e| convert_error(&e))?;

        for (dst, src) in out.iter_mut().zip(&converted) {
            dst.extend_from_slice(src);
        }
    }

    for channel in &mut out {
        channel.drain(..delay);
        channel.truncate(wanted);
    }
    Ok(MultiChannelBuffer::new(out, output_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_at_wire_rate() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsamples_48k_to_16k() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960 * 4]);
        let expected = 320 * 4;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 40,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_blocks_accumulate() {
        let mut rc = RateConverter::new(44_100, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }

    fn sine(frames: usize, rate: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn reply_buffer_upsampled_to_device_rate() {
        let reply = MultiChannelBuffer::new(vec![sine(2_400, 24_000)], 24_000);
        let out = resample_buffer(&reply, 48_000).unwrap();

        assert_eq!(out.sample_rate(), 48_000);
        assert_eq!(out.frames(), 4_800);
        assert!((out.duration_secs() - reply.duration_secs()).abs() < 1e-9);

        // Amplitude survives the conversion away from the edges.
        let peak = out.channel(0)[400..4_400]
            .iter()
            .fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((0.45..0.55).contains(&peak), "peak={peak}");
    }

    #[test]
    fn odd_ratio_keeps_every_channel_aligned() {
        let left = sine(1_000, 24_000);
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let reply = MultiChannelBuffer::new(vec![left, right], 24_000);

        let out = resample_buffer(&reply, 44_100).unwrap();
        assert_eq!(out.num_channels(), 2);
        assert_eq!(out.frames(), 1_838);
        assert_eq!(out.channel(0).len(), out.channel(1).len());
    }

    #[test]
    fn matching_rate_copies_the_buffer() {
        let reply = MultiChannelBuffer::new(vec![sine(100, 24_000)], 24_000);
        assert_eq!(resample_buffer(&reply, 24_000).unwrap(), reply);
    }
}
