//! Capture-side buffering.
//!
//! Uses `ringbuf::HeapRb<f32>` between the real-time capture callback and the
//! framing thread, and `WindowFramer` to cut the drained stream into the fixed
//! windows the capture pipeline consumes.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the framing thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// Live capture is drained continuously so a few seconds of slack is plenty.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Accumulates samples of arbitrary batch size and yields exact windows.
#[derive(Debug)]
pub struct WindowFramer {
    window_len: usize,
    pending: Vec<f32>,
}

impl WindowFramer {
    pub fn new(window_len: usize) -> Self {
        let window_len = window_len.max(1);
        Self {
            window_len,
            pending: Vec::with_capacity(window_len * 2),
        }
    }

    /// Append samples and invoke `on_window` once per completed window.
    pub fn push<F: FnMut(Vec<f32>)>(&mut self, samples: &[f32], mut on_window: F) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.window_len {
            let rest = self.pending.split_off(self.window_len);
            let window = std::mem::replace(&mut self.pending, rest);
            on_window(window);
        }
    }

    /// Samples waiting for the next window.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_exact_windows() {
        let mut framer = WindowFramer::new(4);
        let mut windows = Vec::new();
        framer.push(&[1.0, 2.0, 3.0], |w| windows.push(w));
        assert!(windows.is_empty());
        framer.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |w| windows.push(w));
        assert_eq!(
            windows,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(framer.pending(), 1);
    }

    #[test]
    fn ring_round_trips_samples() {
        let (mut producer, mut consumer) = create_audio_ring();
        assert_eq!(producer.push_slice(&[0.25, -0.25]), 2);
        let mut out = [0.0f32; 4];
        assert_eq!(consumer.pop_slice(&mut out), 2);
        assert_eq!(&out[..2], &[0.25, -0.25]);
    }
}
