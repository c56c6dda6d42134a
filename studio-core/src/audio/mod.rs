//! Audio device abstraction.
//!
//! The session controller talks to devices only through [`AudioBackend`]:
//!
//! - `open_input` registers a handler that is invoked once per fixed capture
//!   window (push-driven, no polling by the caller);
//! - `open_output` returns an [`OutputContext`] with its own playback clock.
//!
//! Dropping the returned input stream or output context releases the device.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! The cpal backend therefore creates and drops every stream on a dedicated thread
//! and hands the caller a `Send` handle that stops that thread on drop.
//!
//! # Capture callback constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority. It
//! only mixes down to mono into a reused buffer and pushes into the SPSC ring
//! buffer; resampling and framing happen on the capture worker thread.

pub mod device;
pub mod output;
pub mod resample;
pub mod wav;

use tracing::warn;

use crate::error::{Result, StudioError};

pub use output::{HandleId, OutputContext, Timeline, VirtualOutput};

#[cfg(feature = "audio-cpal")]
pub use output::CpalOutput;

/// Handler invoked with each captured window of mono f32 samples.
pub type WindowHandler = Box<dyn FnMut(Vec<f32>) + Send + 'static>;

/// What the capture side should deliver.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Rate of the delivered windows (Hz).
    pub sample_rate: u32,
    /// Samples per window.
    pub frame_len: usize,
    /// Preferred microphone name; falls back to the default device.
    pub preferred_device: Option<String>,
}

/// A live microphone capture. Dropping it stops capture and releases the device.
pub trait InputStream: Send {
    /// Native rate of the underlying device (before conversion).
    fn device_sample_rate(&self) -> u32;
}

/// Source of microphone and speaker handles for a session.
pub trait AudioBackend: Send + Sync + 'static {
    type Output: OutputContext + 'static;

    /// Open the microphone and start delivering windows to `on_window`.
    ///
    /// # Errors
    /// `StudioError::DeviceUnavailable` when no microphone can be opened
    /// (missing device, permission denied).
    fn open_input(
        &self,
        request: &CaptureRequest,
        on_window: WindowHandler,
    ) -> Result<Box<dyn InputStream>>;

    /// Open an output context for audio at `sample_rate`.
    fn open_output(&self, sample_rate: u32) -> Result<Self::Output>;
}

/// Backend for machines without audio devices.
///
/// There is no microphone, so a session cannot start; the output side is a
/// wall-clock [`VirtualOutput`] so playback scheduling still behaves normally.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessBackend;

impl AudioBackend for HeadlessBackend {
    type Output = VirtualOutput;

    fn open_input(
        &self,
        _request: &CaptureRequest,
        _on_window: WindowHandler,
    ) -> Result<Box<dyn InputStream>> {
        warn!("no capture backend compiled in");
        Err(StudioError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Self::Output> {
        Ok(VirtualOutput::wall_clock(sample_rate))
    }
}

#[cfg(feature = "audio-cpal")]
pub use self::capture::{AudioCapture, CpalBackend};

#[cfg(feature = "audio-cpal")]
mod capture {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::thread::JoinHandle;
    use std::time::Duration;

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::{AudioBackend, CaptureRequest, CpalOutput, InputStream, WindowHandler};
    use crate::{
        audio::resample::RateConverter,
        buffering::{create_audio_ring, AudioProducer, Consumer, Producer, WindowFramer},
        error::{Result, StudioError},
    };

    /// Samples drained from the ring per worker iteration.
    const DRAIN_CHUNK: usize = 960;

    /// Sleep when the ring is empty (avoids busy-wait burning a core).
    const SLEEP_EMPTY_MS: u64 = 5;

    /// Handle to an open cpal input stream.
    ///
    /// **Not `Send`**: create and drop it on the same OS thread.
    pub struct AudioCapture {
        _stream: Stream,
        running: Arc<AtomicBool>,
        /// Actual capture sample rate reported by the device (Hz).
        pub sample_rate: u32,
    }

    impl AudioCapture {
        /// Open an input device by preferred name, otherwise the default input
        /// device, and push mono f32 frames into `producer`.
        ///
        /// Prefers a device configuration at `wanted_rate` so no resampling is
        /// needed; otherwise uses the device default.
        pub fn open_with_preference(
            producer: AudioProducer,
            running: Arc<AtomicBool>,
            preferred_device_name: Option<&str>,
            wanted_rate: u32,
        ) -> Result<Self> {
            let host = cpal::default_host();

            let preferred = preferred_device_name.and_then(|wanted| {
                let found = host.input_devices().ok().and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                });
                if found.is_none() {
                    warn!("preferred input device '{wanted}' not found, falling back");
                }
                found
            });

            let device = match preferred.or_else(|| host.default_input_device()) {
                Some(device) => device,
                None => {
                    return Err(StudioError::DeviceUnavailable(
                        "no input device found".into(),
                    ))
                }
            };

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let native = device
                .supported_input_configs()
                .ok()
                .and_then(|mut configs| {
                    configs.find(|c| {
                        c.min_sample_rate().0 <= wanted_rate && c.max_sample_rate().0 >= wanted_rate
                    })
                })
                .map(|range| range.with_sample_rate(SampleRate(wanted_rate)));

            let supported = match native {
                Some(config) => config,
                None => device
                    .default_input_config()
                    .map_err(|e| StudioError::DeviceUnavailable(e.to_string()))?,
            };

            let sample_rate = supported.sample_rate().0;
            let channels = supported.channels() as usize;
            info!(sample_rate, channels, "capture config selected");

            let config = StreamConfig {
                channels: supported.channels(),
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = match supported.sample_format() {
                SampleFormat::F32 => {
                    build_mono_stream::<f32>(&device, &config, channels, producer, &running)
                }
                SampleFormat::I16 => {
                    build_mono_stream::<i16>(&device, &config, channels, producer, &running)
                }
                SampleFormat::U8 => {
                    build_mono_stream::<u8>(&device, &config, channels, producer, &running)
                }
                fmt => Err(StudioError::DeviceUnavailable(format!(
                    "unsupported sample format: {fmt:?}"
                ))),
            }?;

            stream
                .play()
                .map_err(|e| StudioError::DeviceUnavailable(e.to_string()))?;

            Ok(Self {
                _stream: stream,
                running,
                sample_rate,
            })
        }

        /// Signal the callback to no-op on its next invocation.
        pub fn stop(&self) {
            self.running.store(false, Ordering::Release);
        }
    }

    fn build_mono_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        channels: usize,
        mut producer: AudioProducer,
        running: &Arc<AtomicBool>,
    ) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let running = Arc::clone(running);
        let channels = channels.max(1);
        let mut mix: Vec<f32> = Vec::new();

        device
            .build_input_stream(
                config,
                move |data: &[T], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / channels;
                    mix.resize(frames, 0.0);
                    for (f, frame) in data.chunks_exact(channels).enumerate() {
                        let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                        mix[f] = sum / channels as f32;
                    }
                    let written = producer.push_slice(&mix);
                    if written < mix.len() {
                        warn!("ring buffer full: dropped {} frames", mix.len() - written);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| StudioError::DeviceUnavailable(e.to_string()))
    }

    /// Capture worker: owns the cpal stream and turns ring contents into windows.
    struct CaptureThread {
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
        device_rate: u32,
    }

    impl InputStream for CaptureThread {
        fn device_sample_rate(&self) -> u32 {
            self.device_rate
        }
    }

    impl Drop for CaptureThread {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    /// Microphone + speaker access through cpal.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CpalBackend;

    impl AudioBackend for CpalBackend {
        type Output = CpalOutput;

        fn open_input(
            &self,
            request: &CaptureRequest,
            mut on_window: WindowHandler,
        ) -> Result<Box<dyn InputStream>> {
            let running = Arc::new(AtomicBool::new(true));
            let request = request.clone();
            let thread_running = Arc::clone(&running);

            // Carries the device rate on success.
            let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

            let thread = std::thread::Builder::new()
                .name("studio-capture".into())
                .spawn(move || {
                    let (producer, mut consumer) = create_audio_ring();
                    let opened = AudioCapture::open_with_preference(
                        producer,
                        Arc::clone(&thread_running),
                        request.preferred_device.as_deref(),
                        request.sample_rate,
                    )
                    .and_then(|capture| {
                        let converter =
                            RateConverter::new(capture.sample_rate, request.sample_rate, DRAIN_CHUNK)?;
                        Ok((capture, converter))
                    });

                    let (capture, mut converter) = match opened {
                        Ok(v) => {
                            let _ = open_tx.send(Ok(v.0.sample_rate));
                            v
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };

                    let mut framer = WindowFramer::new(request.frame_len);
                    let mut scratch = vec![0f32; DRAIN_CHUNK];
                    while thread_running.load(Ordering::Acquire) {
                        let n = consumer.pop_slice(&mut scratch);
                        if n == 0 {
                            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
                            continue;
                        }
                        let converted = converter.process(&scratch[..n]);
                        framer.push(&converted, |window| on_window(window));
                    }

                    capture.stop();
                    // Stream drops here, releasing the microphone on this thread.
                    drop(capture);
                    info!("input device released");
                })?;

            match open_rx.recv() {
                Ok(Ok(device_rate)) => Ok(Box::new(CaptureThread {
                    running,
                    thread: Some(thread),
                    device_rate,
                })),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => Err(StudioError::DeviceUnavailable(
                    "capture thread died before opening the device".into(),
                )),
            }
        }

        fn open_output(&self, sample_rate: u32) -> Result<Self::Output> {
            CpalOutput::open(sample_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_backend_has_no_microphone() {
        let request = CaptureRequest {
            sample_rate: 16_000,
            frame_len: 4096,
            preferred_device: None,
        };
        let err = HeadlessBackend
            .open_input(&request, Box::new(|_| {}))
            .err()
            .expect("headless capture must fail");
        assert!(matches!(err, StudioError::DeviceUnavailable(_)));
    }

    #[test]
    fn headless_output_clock_starts_at_zero() {
        let out = HeadlessBackend.open_output(24_000).unwrap();
        assert_eq!(out.sample_rate(), 24_000);
        assert!(out.current_time() < 1.0);
    }
}
