//! Event types published to the view layer.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `VoiceEngine::subscribe_status` |
//! | `TranscriptEvent` | `VoiceEngine::subscribe_transcripts` |
//!
//! All types are serde-serialisable so a front end can forward them as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle of one live voice session.
///
/// ```text
/// Idle ─start─► Connecting ─open─► Open ─stop─► Closing ─close─► Closed
///                    └──────────────┴──────────────┴──error──► Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has been started (or the last start failed on devices).
    Idle,
    /// Devices acquired, transport handshake in progress.
    Connecting,
    /// Audio is flowing both ways.
    Open,
    /// Close requested, waiting for the transport to confirm.
    Closing,
    /// Session ended normally. Terminal.
    Closed,
    /// Session ended on a transport failure. Terminal.
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }

    /// Connecting, open or closing.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Open | SessionState::Closing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Emitted whenever the session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub seq: u64,
    pub session: u64,
    pub status: SessionState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Who said a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The operator at the microphone.
    User,
    /// The model's spoken reply.
    Model,
}

/// One transcript fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.speaker {
            Speaker::User => write!(f, "You: {}", self.text),
            Speaker::Model => write!(f, "AI: {}", self.text),
        }
    }
}

/// Emitted for every transcript fragment appended to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub seq: u64,
    pub session: u64,
    pub entry: TranscriptEntry,
}
