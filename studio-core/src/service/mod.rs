//! Service façade: one blocking call per AI capability.
//!
//! | Call | Model |
//! |------|-------|
//! | `fast_response` | `gemini-2.5-flash-lite` |
//! | `chat_with_thinking` | `gemini-3-pro-preview` (thinking budget 32768) |
//! | `generate_image` | `gemini-3-pro-image-preview` |
//! | `edit_image` | `gemini-2.5-flash-image` |
//! | `generate_video` | `veo-3.1-fast-generate-preview` |
//! | `search_grounding` | `gemini-3-flash-preview` + Google Search |
//! | `maps_grounding` | `gemini-2.5-flash` + Google Maps |
//! | `text_to_speech` | `gemini-2.5-flash-preview-tts` |
//! | `transcribe_audio` | `gemini-3-flash-preview` |
//! | `analyze_media` | `gemini-3-pro-preview` |
//!
//! The client is `reqwest::blocking`; call it from a blocking context
//! (`tokio::task::spawn_blocking` inside async code). Failures are returned
//! once, never retried.

pub mod client;
pub mod response;
pub mod types;

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info};

pub use client::{resolve_api_key, ClientConfig, GeminiClient, DEFAULT_BASE_URL};
pub use response::{GenerateContentResponse, GroundingKind, Operation};
pub use types::{
    AspectRatio, GroundedAnswer, GroundingLink, ImageSize, InlineMedia, LatLng, VideoAsset,
    VideoAspect,
};

use crate::codec::strip_data_url;
use crate::error::{Result, StudioError};
use crate::live::protocol::SpeechConfig;

pub const FAST_MODEL: &str = "gemini-2.5-flash-lite";
pub const THINKING_MODEL: &str = "gemini-3-pro-preview";
pub const IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const IMAGE_EDIT_MODEL: &str = "gemini-2.5-flash-image";
pub const VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";
pub const SEARCH_MODEL: &str = "gemini-3-flash-preview";
pub const MAPS_MODEL: &str = "gemini-2.5-flash";
pub const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const TRANSCRIBE_MODEL: &str = "gemini-3-flash-preview";
pub const ANALYZE_MODEL: &str = "gemini-3-pro-preview";

pub const THINKING_BUDGET: u32 = 32_768;
pub const DEFAULT_TTS_VOICE: &str = "Kore";
pub const TRANSCRIBE_INSTRUCTION: &str = "Please transcribe this audio accurately.";

/// Sample rate of text-to-speech audio (PCM16 mono).
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// MIME type assumed for a video start frame.
const START_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub client: ClientConfig,
    pub tts_voice: String,
    pub video_poll_interval: Duration,
    pub video_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            video_poll_interval: Duration::from_secs(10),
            video_timeout: Duration::from_secs(600),
        }
    }
}

pub struct GeminiService {
    client: GeminiClient,
    config: ServiceConfig,
}

impl GeminiService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(config.client.clone())?,
            config,
        })
    }

    pub fn fast_response(&self, prompt: &str) -> Result<String> {
        self.generate(FAST_MODEL, &text_request(prompt))?
            .require_text()
    }

    pub fn chat_with_thinking(&self, prompt: &str) -> Result<String> {
        let mut body = text_request(prompt);
        body["generationConfig"] = json!({
            "thinkingConfig": { "thinkingBudget": THINKING_BUDGET }
        });
        self.generate(THINKING_MODEL, &body)?.require_text()
    }

    /// Returns the first image in the response, or `None` when the model
    /// answered without one.
    pub fn generate_image(
        &self,
        prompt: &str,
        aspect: AspectRatio,
        size: ImageSize,
    ) -> Result<Option<InlineMedia>> {
        let mut body = text_request(prompt);
        body["generationConfig"] = json!({
            "imageConfig": { "aspectRatio": aspect, "imageSize": size }
        });
        Ok(self.generate(IMAGE_MODEL, &body)?.first_inline())
    }

    /// `image` may be raw base64 or a data URL.
    pub fn edit_image(&self, prompt: &str, image: &str, mime_type: &str) -> Result<Option<InlineMedia>> {
        let body = media_request(prompt, image, mime_type);
        Ok(self.generate(IMAGE_EDIT_MODEL, &body)?.first_inline())
    }

    /// Start a video job, poll until it finishes, then download the result.
    ///
    /// # Errors
    /// `RequestFailed` when the job reports an error, finishes without a
    /// video, or exceeds `video_timeout`.
    pub fn generate_video(
        &self,
        prompt: &str,
        aspect: VideoAspect,
        start_image: Option<&str>,
    ) -> Result<VideoAsset> {
        let mut instance = json!({ "prompt": prompt });
        if let Some(image) = start_image {
            instance["image"] = json!({
                "bytesBase64Encoded": strip_data_url(image),
                "mimeType": START_IMAGE_MIME,
            });
        }
        let body = json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": aspect,
                "resolution": "1080p",
                "sampleCount": 1,
            }
        });

        let started = Instant::now();
        let mut operation = Operation::parse(&self.client.post_model(
            VIDEO_MODEL,
            "predictLongRunning",
            &body,
        )?)?;
        info!(operation = operation.name.as_str(), "video generation started");

        while !operation.done {
            if started.elapsed() >= self.config.video_timeout {
                return Err(StudioError::RequestFailed(format!(
                    "video generation did not finish within {}s",
                    self.config.video_timeout.as_secs()
                )));
            }
            std::thread::sleep(self.config.video_poll_interval);
            if operation.name.is_empty() {
                return Err(StudioError::Protocol("operation has no name".into()));
            }
            operation = Operation::parse(&self.client.get(&operation.name)?)?;
            debug!(done = operation.done, elapsed = ?started.elapsed(), "video operation polled");
        }

        let uri = operation.video_uri()?;
        let (bytes, content_type) = self.client.download(&uri)?;
        info!(bytes = bytes.len(), "video downloaded");
        Ok(VideoAsset {
            uri,
            mime_type: content_type.unwrap_or_else(|| "video/mp4".to_string()),
            bytes,
        })
    }

    pub fn search_grounding(&self, query: &str) -> Result<GroundedAnswer> {
        let mut body = text_request(query);
        body["tools"] = json!([{ "googleSearch": {} }]);
        Ok(self
            .generate(SEARCH_MODEL, &body)?
            .grounded_answer(GroundingKind::Web))
    }

    pub fn maps_grounding(&self, query: &str, location: Option<LatLng>) -> Result<GroundedAnswer> {
        let mut body = text_request(query);
        body["tools"] = json!([{ "googleMaps": {} }]);
        if let Some(at) = location {
            body["toolConfig"] = json!({ "retrievalConfig": { "latLng": at } });
        }
        Ok(self
            .generate(MAPS_MODEL, &body)?
            .grounded_answer(GroundingKind::Maps))
    }

    /// Base64 PCM16 mono at [`TTS_SAMPLE_RATE`], or `None` if no audio came back.
    pub fn text_to_speech(&self, text: &str) -> Result<Option<String>> {
        let mut body = text_request(text);
        body["generationConfig"] = json!({
            "responseModalities": ["AUDIO"],
            "speechConfig": SpeechConfig::prebuilt(&self.config.tts_voice),
        });
        Ok(self
            .generate(TTS_MODEL, &body)?
            .first_inline()
            .map(|media| media.data))
    }

    /// `audio` may be raw base64 or a data URL.
    pub fn transcribe_audio(&self, audio: &str, mime_type: &str) -> Result<String> {
        let body = media_request(TRANSCRIBE_INSTRUCTION, audio, mime_type);
        self.generate(TRANSCRIBE_MODEL, &body)?.require_text()
    }

    /// Describe or answer a question about an image or video.
    pub fn analyze_media(&self, prompt: &str, media: &str, mime_type: &str) -> Result<String> {
        let body = media_request(prompt, media, mime_type);
        self.generate(ANALYZE_MODEL, &body)?.require_text()
    }

    fn generate(&self, model: &str, body: &Value) -> Result<GenerateContentResponse> {
        let raw = self.client.post_model(model, "generateContent", body)?;
        GenerateContentResponse::parse(&raw)
    }
}

fn text_request(prompt: &str) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
    })
}

/// Media part first, then the instruction.
fn media_request(prompt: &str, media: &str, mime_type: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": mime_type, "data": strip_data_url(media) } },
                { "text": prompt }
            ]
        }]
    })
}
