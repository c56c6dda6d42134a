//! Gapless scheduling of inbound audio chunks.
//!
//! Each decoded chunk starts where the previous one ends, or now if the output
//! has already played past that point:
//!
//! ```text
//! start(n)   = max(clock, output.current_time())
//! clock      = start(n) + duration(n)
//! ```
//!
//! An interruption stops everything in flight and pulls the clock back to the
//! output's current time so the next reply starts immediately.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::audio::{HandleId, OutputContext};
use crate::buffering::chunk::MultiChannelBuffer;
use crate::codec::decode_pcm16_text;
use crate::error::Result;

/// Next available start time on the output clock. Never moves backwards except
/// on interruption, where it is reset to the output's current time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackClock {
    next_start: f64,
}

impl PlaybackClock {
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Claim `duration` seconds starting no earlier than `now`.
    fn reserve(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.next_start.max(now);
        self.next_start = start + duration;
        start
    }

    fn reset(&mut self, now: f64) {
        self.next_start = now;
    }
}

/// One scheduled playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackHandle {
    pub id: HandleId,
    /// Scheduled start on the output clock (seconds).
    pub start_at: f64,
    pub duration: f64,
    pub stopped: bool,
}

impl PlaybackHandle {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler<O: OutputContext> {
    output: O,
    clock: PlaybackClock,
    active: BTreeMap<HandleId, PlaybackHandle>,
    next_id: HandleId,
    channels: usize,
}

impl<O: OutputContext> PlaybackScheduler<O> {
    pub fn new(output: O, channels: usize) -> Self {
        let now = output.current_time();
        Self {
            output,
            clock: PlaybackClock { next_start: now },
            active: BTreeMap::new(),
            next_id: 1,
            channels: channels.max(1),
        }
    }

    /// Decode a base64 PCM16 payload and schedule it.
    ///
    /// Returns `Ok(None)` for an empty payload.
    ///
    /// # Errors
    /// `MalformedEncoding` or `ChannelMismatch` when the payload cannot be
    /// decoded; nothing is scheduled in that case.
    pub fn enqueue_encoded(&mut self, data: &str) -> Result<Option<HandleId>> {
        let buffer = decode_pcm16_text(data, self.channels, self.output.sample_rate())?;
        Ok(self.schedule(buffer))
    }

    /// Schedule a decoded buffer right after everything already queued.
    pub fn schedule(&mut self, buffer: MultiChannelBuffer) -> Option<HandleId> {
        if buffer.is_empty() {
            debug!("ignoring empty audio chunk");
            return None;
        }

        let duration = buffer.duration_secs();
        let start_at = self.clock.reserve(self.output.current_time(), duration);
        let id = self.next_id;
        self.next_id += 1;

        self.output.play(id, Arc::new(buffer), start_at);
        self.active.insert(
            id,
            PlaybackHandle {
                id,
                start_at,
                duration,
                stopped: false,
            },
        );
        debug!(id, start_at, duration, "audio chunk scheduled");
        Some(id)
    }

    /// Remove handles the output reports as finished. Returns how many.
    pub fn reap_finished(&mut self) -> usize {
        let finished = self.output.drain_finished();
        finished
            .into_iter()
            .filter(|id| self.active.remove(id).is_some())
            .count()
    }

    /// Stop every active playback, clear the set and reset the clock.
    ///
    /// Returns the stopped handles.
    pub fn interrupt(&mut self) -> Vec<PlaybackHandle> {
        let stopped: Vec<PlaybackHandle> = std::mem::take(&mut self.active)
            .into_values()
            .map(|mut handle| {
                self.output.stop(handle.id);
                handle.stopped = true;
                handle
            })
            .collect();

        let now = self.output.current_time();
        self.clock.reset(now);
        // Anything that finished just before the stop is no longer tracked.
        let _ = self.output.drain_finished();
        info!(stopped = stopped.len(), clock = now, "playback interrupted");
        stopped
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn handle(&self, id: HandleId) -> Option<&PlaybackHandle> {
        self.active.get(&id)
    }

    pub fn clock(&self) -> PlaybackClock {
        self.clock
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::audio::VirtualOutput;
    use crate::codec::{encode_bytes_to_text, pcm16_to_bytes};
    use crate::error::StudioError;

    const RATE: u32 = 24_000;

    fn scheduler() -> PlaybackScheduler<VirtualOutput> {
        PlaybackScheduler::new(VirtualOutput::manual(RATE), 1)
    }

    fn payload(secs: f64) -> String {
        let samples = vec![100i16; (secs * RATE as f64) as usize];
        encode_bytes_to_text(&pcm16_to_bytes(&samples))
    }

    #[test]
    fn consecutive_chunks_play_back_to_back() {
        let mut s = scheduler();
        let a = s.enqueue_encoded(&payload(0.5)).unwrap().unwrap();
        let b = s.enqueue_encoded(&payload(0.3)).unwrap().unwrap();
        let c = s.enqueue_encoded(&payload(0.2)).unwrap().unwrap();

        let (ha, hb, hc) = (
            s.handle(a).unwrap().clone(),
            s.handle(b).unwrap().clone(),
            s.handle(c).unwrap().clone(),
        );
        assert_relative_eq!(ha.start_at, 0.0);
        assert_relative_eq!(hb.start_at, ha.end());
        assert_relative_eq!(hc.start_at, hb.end());
        assert_relative_eq!(s.clock().next_start(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn late_chunk_starts_at_current_output_time() {
        let mut s = scheduler();
        s.enqueue_encoded(&payload(0.1)).unwrap();
        s.output_mut().advance_secs(2.0);
        let id = s.enqueue_encoded(&payload(0.1)).unwrap().unwrap();
        assert_relative_eq!(s.handle(id).unwrap().start_at, 2.0);
    }

    #[test]
    fn finished_handles_are_reaped() {
        let mut s = scheduler();
        s.enqueue_encoded(&payload(0.5)).unwrap();
        s.enqueue_encoded(&payload(0.5)).unwrap();
        s.output_mut().advance_secs(0.6);
        assert_eq!(s.reap_finished(), 1);
        assert_eq!(s.active_count(), 1);
        s.output_mut().advance_secs(0.5);
        assert_eq!(s.reap_finished(), 1);
        assert_eq!(s.active_count(), 0);
    }

    #[test]
    fn interrupt_stops_everything_and_resets_clock() {
        let mut s = scheduler();
        let a = s.enqueue_encoded(&payload(1.0)).unwrap().unwrap();
        let b = s.enqueue_encoded(&payload(1.0)).unwrap().unwrap();
        s.output_mut().advance_secs(0.4);

        let stopped = s.interrupt();
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|h| h.stopped));
        assert_eq!(s.active_count(), 0);
        assert_eq!(s.output().stopped(), &[a, b]);
        assert_relative_eq!(s.clock().next_start(), 0.4, epsilon = 1e-9);

        let next = s.enqueue_encoded(&payload(0.1)).unwrap().unwrap();
        assert_relative_eq!(s.handle(next).unwrap().start_at, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn empty_payload_creates_no_handle() {
        let mut s = scheduler();
        assert_eq!(s.enqueue_encoded("").unwrap(), None);
        assert_eq!(s.active_count(), 0);
        assert_relative_eq!(s.clock().next_start(), 0.0);
    }

    #[test]
    fn malformed_payload_leaves_clock_untouched() {
        let mut s = scheduler();
        assert!(matches!(
            s.enqueue_encoded("@@not base64@@"),
            Err(StudioError::MalformedEncoding(_))
        ));
        assert_eq!(s.active_count(), 0);
        assert_relative_eq!(s.clock().next_start(), 0.0);
    }
}
