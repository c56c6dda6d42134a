//! Live voice session: capture → transport → playback.
//!
//! ```text
//! AudioBackend ─window─► SessionEvent::CaptureWindow ─┐
//! Transport I/O thread ─Opened/Message/Closed/Error──┼─► crossbeam queue ─► SessionController
//! VoiceEngine::stop ─StopRequested───────────────────┘         │
//!                                                 CapturePipeline ─► Transport::send
//!                                                 PlaybackScheduler ─► OutputContext
//! ```
//!
//! Everything that mutates session state runs on the one thread that drains the
//! queue, so the playback clock and handle set need no locks.

pub mod capture;
pub mod controller;
pub mod diagnostics;
pub mod gemini;
pub mod playback;
pub mod protocol;
pub mod transport;

use std::time::Duration;

use crossbeam_channel::Sender;

use self::protocol::InboundMessage;

/// Wire rate of outbound microphone audio (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate of the provider's spoken replies (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound capture window (256 ms at 16 kHz).
pub const CAPTURE_FRAME_LEN: usize = 4096;

/// Outbound frames buffered before the oldest is dropped (≈ 8 s of audio).
pub const OUTBOUND_QUEUE_CAP: usize = 32;

/// Transcript fragments retained: the last ten plus the newest.
pub const TRANSCRIPT_CAPACITY: usize = 11;

/// How long a requested close may wait for the server's answer.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub const LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_LIVE_VOICE: &str = "Zephyr";

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly and professional voice \
assistant for ArzuBazar and ShopSera. Help users with order status and product info.";

/// Configuration of one live voice session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub model: String,
    /// Prebuilt provider voice for spoken replies.
    pub voice_name: String,
    pub system_instruction: Option<String>,
    /// Overrides the environment credential when set.
    pub api_key: Option<String>,
    pub endpoint: String,
    pub capture_sample_rate: u32,
    pub capture_frame_len: usize,
    pub playback_sample_rate: u32,
    /// Channels in inbound audio payloads.
    pub playback_channels: usize,
    pub outbound_queue_cap: usize,
    pub transcript_capacity: usize,
    /// Microphone name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Bound on the close handshake before the session is closed locally.
    pub close_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: LIVE_MODEL.to_string(),
            voice_name: DEFAULT_LIVE_VOICE.to_string(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            api_key: None,
            endpoint: LIVE_ENDPOINT.to_string(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            capture_frame_len: CAPTURE_FRAME_LEN,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            playback_channels: 1,
            outbound_queue_cap: OUTBOUND_QUEUE_CAP,
            transcript_capacity: TRANSCRIPT_CAPACITY,
            preferred_input_device: None,
            close_timeout: CLOSE_TIMEOUT,
        }
    }
}

/// Everything that can happen to a session, funnelled through one queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The provider finished the setup handshake.
    Opened,
    Message(InboundMessage),
    TransportError(String),
    /// The connection closed, either on request or from the server side.
    Closed { reason: Option<String> },
    /// One window of mono f32 samples at the capture rate.
    CaptureWindow(Vec<f32>),
    StopRequested,
}

/// A [`SessionEvent`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnvelope {
    pub session: u64,
    pub event: SessionEvent,
}

/// Posts events for one session into the controller's queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    session: u64,
    tx: Sender<SessionEnvelope>,
}

impl EventSender {
    pub fn new(session: u64, tx: Sender<SessionEnvelope>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the receiving loop has gone away.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx
            .send(SessionEnvelope {
                session: self.session,
                event,
            })
            .is_ok()
    }
}
