//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use studio_core::live::{LiveConfig, DEFAULT_LIVE_VOICE};
use studio_core::service::{
    AspectRatio, ClientConfig, ImageSize, ServiceConfig, VideoAspect, DEFAULT_BASE_URL,
    DEFAULT_TTS_VOICE,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Used only when neither `GEMINI_API_KEY` nor `API_KEY` is set.
    pub api_key: Option<String>,
    pub base_url: String,
    pub preferred_input_device: Option<String>,
    pub live_voice: String,
    pub tts_voice: String,
    /// Chat uses the thinking model unless turned off here or with `--fast`.
    pub thinking_mode: bool,
    pub image_aspect: AspectRatio,
    pub image_size: ImageSize,
    pub video_aspect: VideoAspect,
    pub request_timeout_secs: u64,
    pub video_poll_secs: u64,
    pub video_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            preferred_input_device: None,
            live_voice: DEFAULT_LIVE_VOICE.into(),
            tts_voice: DEFAULT_TTS_VOICE.into(),
            thinking_mode: true,
            image_aspect: AspectRatio::default(),
            image_size: ImageSize::default(),
            video_aspect: VideoAspect::default(),
            request_timeout_secs: 120,
            video_poll_secs: 10,
            video_timeout_secs: 600,
        }
    }
}

/// What `settings show` prints. The credential itself is never echoed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub has_api_key: bool,
    pub base_url: String,
    pub preferred_input_device: Option<String>,
    pub live_voice: String,
    pub tts_voice: String,
    pub thinking_mode: bool,
    pub image_aspect: AspectRatio,
    pub image_size: ImageSize,
    pub video_aspect: VideoAspect,
    pub request_timeout_secs: u64,
    pub video_poll_secs: u64,
    pub video_timeout_secs: u64,
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_key = normalize_optional(self.api_key.as_deref());
        self.base_url = normalize_base_url(&self.base_url);
        self.preferred_input_device = normalize_optional(self.preferred_input_device.as_deref());
        self.live_voice = normalize_voice(&self.live_voice, DEFAULT_LIVE_VOICE);
        self.tts_voice = normalize_voice(&self.tts_voice, DEFAULT_TTS_VOICE);
        self.request_timeout_secs = self.request_timeout_secs.clamp(10, 600);
        self.video_poll_secs = self.video_poll_secs.clamp(1, 60);
        self.video_timeout_secs = self.video_timeout_secs.clamp(60, 3600);
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            has_api_key: self.api_key.is_some(),
            base_url: self.base_url.clone(),
            preferred_input_device: self.preferred_input_device.clone(),
            live_voice: self.live_voice.clone(),
            tts_voice: self.tts_voice.clone(),
            thinking_mode: self.thinking_mode,
            image_aspect: self.image_aspect,
            image_size: self.image_size,
            video_aspect: self.video_aspect,
            request_timeout_secs: self.request_timeout_secs,
            video_poll_secs: self.video_poll_secs,
            video_timeout_secs: self.video_timeout_secs,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            client: ClientConfig {
                base_url: self.base_url.clone(),
                api_key: self.api_key.clone(),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
            },
            tts_voice: self.tts_voice.clone(),
            video_poll_interval: Duration::from_secs(self.video_poll_secs),
            video_timeout: Duration::from_secs(self.video_timeout_secs),
        }
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            voice_name: self.live_voice.clone(),
            api_key: self.api_key.clone(),
            preferred_input_device: self.preferred_input_device.clone(),
            ..LiveConfig::default()
        }
    }
}

fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.into()
    } else {
        DEFAULT_BASE_URL.into()
    }
}

/// Prebuilt voice names are capitalised (`Zephyr`, `Kore`, ...).
pub fn normalize_voice(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        None => fallback.into(),
        Some(first) => format!(
            "{}{}",
            first.to_uppercase(),
            chars.as_str().to_ascii_lowercase()
        ),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Studio")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("studio")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
