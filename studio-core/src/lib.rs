//! # studio-core
//!
//! Engine SDK behind the Studio operator console.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioBackend → CaptureWindow events ─┐
//!                                                   ├─► SessionController (spawn_blocking)
//! Provider WebSocket (I/O thread) → session events ─┘        │            │
//!                                                  Transport::send   PlaybackScheduler
//!                                                                         │
//!                                                                  OutputContext → Speaker
//! ```
//!
//! The request/response capabilities (chat, images, video, grounding, speech,
//! transcription) live in [`service`] and are independent of the live session.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod events;
pub mod live;
pub mod service;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, HeadlessBackend};
pub use engine::VoiceEngine;
pub use error::{Result, StudioError};
pub use events::{SessionState, SessionStatusEvent, Speaker, TranscriptEntry, TranscriptEvent};
pub use live::{gemini::GeminiLiveConnector, LiveConfig};
pub use service::{GeminiService, ServiceConfig};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;
