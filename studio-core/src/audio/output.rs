//! Audio output contexts.
//!
//! An output context owns a running clock (seconds of audio rendered since it was
//! opened) and plays buffers at requested positions on that clock. The playback
//! scheduler decides *when* a buffer starts; the context only honours it.
//!
//! ```text
//! PlaybackScheduler ──play(id, buf, start_at)──► OutputContext ──► Timeline::render
//!                   ◄──────drain_finished()─────                     (device callback)
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::buffering::chunk::MultiChannelBuffer;

/// Identifies one scheduled playback.
pub type HandleId = u64;

/// A destination for scheduled audio with its own monotonic clock.
pub trait OutputContext: Send {
    /// Sample rate the context was opened for.
    fn sample_rate(&self) -> u32;

    /// Seconds of audio rendered so far. Never decreases.
    fn current_time(&self) -> f64;

    /// Start `buffer` at `start_at` seconds on this context's clock.
    fn play(&mut self, id: HandleId, buffer: Arc<MultiChannelBuffer>, start_at: f64);

    /// Stop a scheduled or playing buffer immediately. Unknown ids are ignored.
    fn stop(&mut self, id: HandleId);

    /// Handles that finished playing naturally since the last call.
    fn drain_finished(&mut self) -> Vec<HandleId>;
}

impl<O: OutputContext> OutputContext for Arc<Mutex<O>> {
    fn sample_rate(&self) -> u32 {
        self.lock().sample_rate()
    }

    fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    fn play(&mut self, id: HandleId, buffer: Arc<MultiChannelBuffer>, start_at: f64) {
        self.lock().play(id, buffer, start_at)
    }

    fn stop(&mut self, id: HandleId) {
        self.lock().stop(id)
    }

    fn drain_finished(&mut self) -> Vec<HandleId> {
        self.lock().drain_finished()
    }
}

#[derive(Debug)]
struct ScheduledSource {
    id: HandleId,
    buffer: Arc<MultiChannelBuffer>,
    start_at: f64,
}

impl ScheduledSource {
    fn end(&self) -> f64 {
        self.start_at + self.buffer.duration_secs()
    }
}

/// Mixer of scheduled buffers rendered at a fixed device rate.
///
/// The clock is the number of rendered device frames divided by the device rate.
/// Buffers at a different sample rate are read with nearest-sample lookup;
/// `CpalOutput` converts replies to the device rate before scheduling them.
#[derive(Debug)]
pub struct Timeline {
    device_rate: u32,
    frames_rendered: u64,
    sources: Vec<ScheduledSource>,
    finished: Vec<HandleId>,
}

impl Timeline {
    pub fn new(device_rate: u32) -> Self {
        Self {
            device_rate: device_rate.max(1),
            frames_rendered: 0,
            sources: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.device_rate as f64
    }

    pub fn schedule(&mut self, id: HandleId, buffer: Arc<MultiChannelBuffer>, start_at: f64) {
        self.sources.push(ScheduledSource {
            id,
            buffer,
            start_at,
        });
    }

    /// Remove a source without reporting it as finished.
    pub fn cancel(&mut self, id: HandleId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    /// Number of sources that have not finished yet.
    pub fn pending(&self) -> usize {
        self.sources.len()
    }

    /// Render interleaved output for `out.len() / channels` frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let rate = self.device_rate as f64;

        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            frame.iter_mut().for_each(|s| *s = 0.0);
            let t = (self.frames_rendered + offset as u64) as f64 / rate;

            for source in &self.sources {
                if t < source.start_at || t >= source.end() {
                    continue;
                }
                let buf = &source.buffer;
                let idx = ((t - source.start_at) * buf.sample_rate() as f64) as usize;
                if idx >= buf.frames() {
                    continue;
                }
                let src_channels = buf.num_channels();
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample += buf.channel(c.min(src_channels - 1))[idx];
                }
            }

            frame.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
        }

        self.frames_rendered += (out.len() / channels) as u64;
        self.retire();
    }

    /// Advance the clock by `frames` without producing samples.
    pub fn advance(&mut self, frames: u64) {
        self.frames_rendered += frames;
        self.retire();
    }

    pub fn take_finished(&mut self) -> Vec<HandleId> {
        std::mem::take(&mut self.finished)
    }

    fn retire(&mut self) {
        let now = self.current_time();
        let finished = &mut self.finished;
        self.sources.retain(|s| {
            if s.end() <= now {
                finished.push(s.id);
                false
            } else {
                true
            }
        });
    }
}

#[derive(Debug)]
enum ClockMode {
    Manual,
    WallClock(Instant),
}

/// Output context without a device.
///
/// In manual mode the clock only moves through [`VirtualOutput::advance_secs`],
/// which makes scheduling fully deterministic. In wall-clock mode it follows real
/// time, which is what a headless session wants.
#[derive(Debug)]
pub struct VirtualOutput {
    sample_rate: u32,
    timeline: Timeline,
    mode: ClockMode,
    stopped: Vec<HandleId>,
}

impl VirtualOutput {
    pub fn manual(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            timeline: Timeline::new(sample_rate),
            mode: ClockMode::Manual,
            stopped: Vec::new(),
        }
    }

    pub fn wall_clock(sample_rate: u32) -> Self {
        Self {
            mode: ClockMode::WallClock(Instant::now()),
            ..Self::manual(sample_rate)
        }
    }

    /// Move the manual clock forward.
    pub fn advance_secs(&mut self, secs: f64) {
        let frames = (secs.max(0.0) * self.sample_rate as f64).round() as u64;
        self.timeline.advance(frames);
    }

    /// Ids passed to `stop`, in order.
    pub fn stopped(&self) -> &[HandleId] {
        &self.stopped
    }

    /// Buffers scheduled and not yet finished or stopped.
    pub fn pending(&self) -> usize {
        self.timeline.pending()
    }

    fn sync(&mut self) {
        if let ClockMode::WallClock(origin) = self.mode {
            let target = (origin.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
            let rendered = (self.timeline.current_time() * self.sample_rate as f64).round() as u64;
            if target > rendered {
                self.timeline.advance(target - rendered);
            }
        }
    }
}

impl OutputContext for VirtualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        match self.mode {
            ClockMode::Manual => self.timeline.current_time(),
            ClockMode::WallClock(origin) => origin
                .elapsed()
                .as_secs_f64()
                .max(self.timeline.current_time()),
        }
    }

    fn play(&mut self, id: HandleId, buffer: Arc<MultiChannelBuffer>, start_at: f64) {
        self.sync();
        self.timeline.schedule(id, buffer, start_at);
    }

    fn stop(&mut self, id: HandleId) {
        self.timeline.cancel(id);
        self.stopped.push(id);
    }

    fn drain_finished(&mut self) -> Vec<HandleId> {
        self.sync();
        self.timeline.take_finished()
    }
}

#[cfg(feature = "audio-cpal")]
pub use self::device_output::CpalOutput;

#[cfg(feature = "audio-cpal")]
mod device_output {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::thread::JoinHandle;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use parking_lot::Mutex;
    use tracing::{error, info, warn};

    use super::{HandleId, OutputContext, Timeline};
    use crate::audio::resample::resample_buffer;
    use crate::buffering::chunk::MultiChannelBuffer;
    use crate::error::{Result, StudioError};

    /// Speaker output rendering a shared [`Timeline`] from the cpal callback.
    ///
    /// The cpal stream lives on its own thread (it is `!Send`); dropping this
    /// value stops that thread and releases the device.
    pub struct CpalOutput {
        sample_rate: u32,
        timeline: Arc<Mutex<Timeline>>,
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl CpalOutput {
        /// Open the default output device. `sample_rate` is the rate of the audio
        /// that will be scheduled; the device may run at a different rate.
        pub fn open(sample_rate: u32) -> Result<Self> {
            let running = Arc::new(AtomicBool::new(true));
            let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<Arc<Mutex<Timeline>>>>();
            let thread_running = Arc::clone(&running);

            let thread = std::thread::Builder::new()
                .name("studio-output".into())
                .spawn(move || {
                    let (stream, timeline) = match build_stream(sample_rate) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = open_tx.send(Ok(timeline));
                    while thread_running.load(Ordering::Acquire) {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    drop(stream);
                    info!("output device released");
                })?;

            match open_rx.recv() {
                Ok(Ok(timeline)) => Ok(Self {
                    sample_rate,
                    timeline,
                    running,
                    thread: Some(thread),
                }),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => Err(StudioError::DeviceUnavailable(
                    "output thread exited before opening the device".into(),
                )),
            }
        }
    }

    fn build_stream(sample_rate: u32) -> Result<(cpal::Stream, Arc<Mutex<Timeline>>)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| StudioError::DeviceUnavailable("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| StudioError::DeviceUnavailable(e.to_string()))?;

        let channels = supported.channels() as usize;
        let device_rate = supported.sample_rate().0;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            device_rate, channels, sample_rate, "opening output device"
        );

        let timeline = Arc::new(Mutex::new(Timeline::new(device_rate)));
        let render_timeline = Arc::clone(&timeline);
        let config: cpal::StreamConfig = supported.config();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _| render_timeline.lock().render(data, channels),
                |err| error!("output stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        scratch.resize(data.len(), 0.0);
                        render_timeline.lock().render(&mut scratch, channels);
                        for (dst, src) in data.iter_mut().zip(&scratch) {
                            *dst = (src * 32767.0) as i16;
                        }
                    },
                    |err| error!("output stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(StudioError::DeviceUnavailable(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| StudioError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| StudioError::DeviceUnavailable(e.to_string()))?;
        Ok((stream, timeline))
    }

    impl OutputContext for CpalOutput {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn current_time(&self) -> f64 {
            self.timeline.lock().current_time()
        }

        fn play(&mut self, id: HandleId, buffer: Arc<MultiChannelBuffer>, start_at: f64) {
            let device_rate = self.timeline.lock().device_rate();
            let buffer = if buffer.sample_rate() == device_rate {
                buffer
            } else {
                // Outside the lock: the render callback takes it every period.
                match resample_buffer(&buffer, device_rate) {
                    Ok(converted) => Arc::new(converted),
                    Err(e) => {
                        warn!(id, "playing reply unconverted: {e}");
                        buffer
                    }
                }
            };
            self.timeline.lock().schedule(id, buffer, start_at);
        }

        fn stop(&mut self, id: HandleId) {
            self.timeline.lock().cancel(id);
        }

        fn drain_finished(&mut self) -> Vec<HandleId> {
            self.timeline.lock().take_finished()
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize, value: f32, rate: u32) -> Arc<MultiChannelBuffer> {
        Arc::new(MultiChannelBuffer::new(vec![vec![value; frames]], rate))
    }

    #[test]
    fn timeline_renders_sources_at_their_start() {
        let mut timeline = Timeline::new(4);
        timeline.schedule(1, tone(2, 0.5, 4), 0.5);

        let mut out = [1.0f32; 4];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);
        assert_eq!(timeline.current_time(), 1.0);
        assert_eq!(timeline.take_finished(), vec![1]);
    }

    #[test]
    fn timeline_duplicates_mono_into_stereo() {
        let mut timeline = Timeline::new(2);
        timeline.schedule(7, tone(2, 0.25, 2), 0.0);
        let mut out = [0.0f32; 4];
        timeline.render(&mut out, 2);
        assert_eq!(out, [0.25; 4]);
    }

    #[test]
    fn cancelled_sources_are_not_reported_finished() {
        let mut timeline = Timeline::new(10);
        timeline.schedule(1, tone(5, 0.1, 10), 0.0);
        assert!(timeline.cancel(1));
        timeline.advance(10);
        assert!(timeline.take_finished().is_empty());
    }

    #[test]
    fn virtual_output_finishes_on_manual_advance() {
        let mut out = VirtualOutput::manual(24_000);
        out.play(1, tone(12_000, 0.0, 24_000), 0.0);
        out.advance_secs(0.25);
        assert!(out.drain_finished().is_empty());
        out.advance_secs(0.25);
        assert_eq!(out.drain_finished(), vec![1]);
        assert_eq!(out.current_time(), 0.5);
    }

    #[test]
    fn shared_output_delegates_through_the_lock() {
        let shared = Arc::new(Mutex::new(VirtualOutput::manual(24_000)));
        let mut handle = Arc::clone(&shared);
        handle.play(3, tone(24, 0.0, 24_000), 0.0);
        handle.stop(3);
        assert_eq!(shared.lock().stopped(), &[3]);
        assert_eq!(shared.lock().pending(), 0);
    }
}
