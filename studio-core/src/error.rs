use thiserror::Error;

/// All errors produced by studio-core.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("{samples} samples cannot be split evenly into {channels} channels")]
    ChannelMismatch { samples: usize, channels: usize },

    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingCredential,

    #[error("unexpected provider payload: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StudioError>;

impl From<reqwest::Error> for StudioError {
    fn from(err: reqwest::Error) -> Self {
        StudioError::RequestFailed(err.to_string())
    }
}

impl From<tungstenite::Error> for StudioError {
    fn from(err: tungstenite::Error) -> Self {
        StudioError::Transport(err.to_string())
    }
}
