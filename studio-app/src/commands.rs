//! Command handlers behind the console screens.
//!
//! Every provider call runs on the blocking pool and returns
//! `Result<T, String>`; screens turn an `Err` into a single notice.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use studio_core::{
    audio::{device::DeviceInfo, wav, AudioBackend, CaptureRequest},
    buffering::chunk::AudioChunk,
    codec::{bytes_to_pcm16, decode_text_to_bytes, encode_bytes_to_text, float_to_pcm16},
    service::{
        AspectRatio, GroundedAnswer, ImageSize, InlineMedia, LatLng, VideoAsset, VideoAspect,
        TTS_SAMPLE_RATE,
    },
    GeminiService, SessionState,
};
use tracing::{info, warn};

use crate::settings::RuntimeSettings;
use crate::state::{AppState, Backend};

/// Sample rate of microphone recordings sent for transcription.
const RECORD_SAMPLE_RATE: u32 = 16_000;

async fn run_blocking<T, F>(state: &AppState, operation: &'static str, call: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&GeminiService) -> studio_core::Result<T> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|e| format!("{operation} task failed: {e}"))?;
    let elapsed = started.elapsed();
    state
        .request_stats
        .lock()
        .record(operation, elapsed, result.is_ok());
    result.map_err(|e| {
        warn!(operation, ?elapsed, "request failed: {e}");
        e.to_string()
    })
}

/// One chat turn; thinking mode picks the reasoning model.
pub async fn chat(state: &AppState, prompt: String, thinking: bool) -> Result<String, String> {
    run_blocking(state, "chat", move |service| {
        if thinking {
            service.chat_with_thinking(&prompt)
        } else {
            service.fast_response(&prompt)
        }
    })
    .await
}

pub async fn generate_image(
    state: &AppState,
    prompt: String,
    aspect: AspectRatio,
    size: ImageSize,
) -> Result<Option<InlineMedia>, String> {
    run_blocking(state, "image.generate", move |service| {
        service.generate_image(&prompt, aspect, size)
    })
    .await
}

pub async fn edit_image(
    state: &AppState,
    instruction: String,
    image: InlineMedia,
) -> Result<Option<InlineMedia>, String> {
    run_blocking(state, "image.edit", move |service| {
        service.edit_image(&instruction, &image.data, &image.mime_type)
    })
    .await
}

pub async fn generate_video(
    state: &AppState,
    prompt: String,
    aspect: VideoAspect,
    start_image: Option<InlineMedia>,
) -> Result<VideoAsset, String> {
    run_blocking(state, "video.generate", move |service| {
        service.generate_video(&prompt, aspect, start_image.as_ref().map(|m| m.data.as_str()))
    })
    .await
}

pub async fn analyze_media(state: &AppState, prompt: String, media: InlineMedia) -> Result<String, String> {
    run_blocking(state, "video.analyze", move |service| {
        service.analyze_media(&prompt, &media.data, &media.mime_type)
    })
    .await
}

pub async fn search_grounding(state: &AppState, query: String) -> Result<GroundedAnswer, String> {
    run_blocking(state, "ground.search", move |service| service.search_grounding(&query)).await
}

pub async fn maps_grounding(
    state: &AppState,
    query: String,
    location: Option<LatLng>,
) -> Result<GroundedAnswer, String> {
    run_blocking(state, "ground.maps", move |service| {
        service.maps_grounding(&query, location)
    })
    .await
}

pub async fn transcribe(state: &AppState, audio: InlineMedia) -> Result<String, String> {
    run_blocking(state, "transcribe", move |service| {
        service.transcribe_audio(&audio.data, &audio.mime_type)
    })
    .await
}

/// Synthesize `text` and write it to `out` as a WAV file.
pub async fn speak_to_file(state: &AppState, text: String, out: PathBuf) -> Result<PathBuf, String> {
    run_blocking(state, "speak", move |service| {
        let audio = service.text_to_speech(&text)?.ok_or_else(|| {
            studio_core::StudioError::RequestFailed("no audio in speech response".into())
        })?;
        let samples = bytes_to_pcm16(&decode_text_to_bytes(&audio)?)?;
        wav::write_wav(&out, &AudioChunk::new(samples, TTS_SAMPLE_RATE))?;
        Ok(out)
    })
    .await
}

/// Read a media file as base64 with a MIME type guessed from its extension.
pub fn load_media(path: &Path) -> Result<InlineMedia, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(InlineMedia {
        mime_type: mime_for_path(path).to_string(),
        data: encode_bytes_to_text(&bytes),
    })
}

/// Load audio for transcription. WAV files are decoded first so an empty or
/// corrupt recording fails here instead of at the provider.
pub fn load_audio(path: &Path) -> Result<InlineMedia, String> {
    if mime_for_path(path) == "audio/wav" {
        let chunk = wav::read_wav(path).map_err(|e| format!("unreadable WAV {}: {e}", path.display()))?;
        if chunk.is_empty() {
            return Err(format!("{} contains no audio", path.display()));
        }
        info!(
            file = %path.display(),
            secs = chunk.duration_secs(),
            sample_rate = chunk.sample_rate(),
            channels = chunk.channels(),
            "loaded recording"
        );
    }
    load_media(path)
}

/// Decode inline media and write it to `path`.
pub fn save_media(media: &InlineMedia, path: &Path) -> Result<(), String> {
    let bytes = decode_text_to_bytes(&media.data).map_err(|e| e.to_string())?;
    std::fs::write(path, bytes).map_err(|e| format!("cannot write {}: {e}", path.display()))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// File extension for a MIME type returned by the provider.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or_default().trim() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "audio/wav" => "wav",
        _ if mime.starts_with("video/") => "mp4",
        _ => "png",
    }
}

/// Record `duration` of microphone audio into a WAV file at `out`.
pub async fn record_clip(device: Option<String>, duration: Duration, out: PathBuf) -> Result<PathBuf, String> {
    tokio::task::spawn_blocking(move || {
        let captured = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = Arc::clone(&captured);
        let request = CaptureRequest {
            sample_rate: RECORD_SAMPLE_RATE,
            frame_len: 1024,
            preferred_device: device,
        };
        let input = Backend::default().open_input(
            &request,
            Box::new(move |window| sink.lock().extend_from_slice(&window)),
        )?;
        info!(
            secs = duration.as_secs(),
            device_rate = input.device_sample_rate(),
            "recording"
        );
        std::thread::sleep(duration);
        drop(input);

        let samples = float_to_pcm16(&captured.lock());
        wav::write_wav(&out, &AudioChunk::new(samples, RECORD_SAMPLE_RATE))?;
        Ok::<_, studio_core::StudioError>(out)
    })
    .await
    .map_err(|e| format!("recording task failed: {e}"))?
    .map_err(|e| e.to_string())
}

/// Start a live session, optionally on a specific microphone.
pub async fn start_live(state: &AppState, device: Option<String>) -> Result<(), String> {
    if device.is_some() {
        state.engine.set_preferred_input_device(device);
    }
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || engine.start())
        .await
        .map_err(|e| format!("live task failed: {e}"))?
        .map_err(|e| e.to_string())
}

pub fn stop_live(state: &AppState) {
    state.engine.stop();
}

pub fn live_status(state: &AppState) -> SessionState {
    state.engine.status()
}

pub fn list_audio_devices() -> Vec<DeviceInfo> {
    let mut devices = studio_core::audio::device::list_input_devices();
    devices.extend(studio_core::audio::device::list_output_devices());
    devices
}

pub fn get_runtime_settings(state: &AppState) -> RuntimeSettings {
    state.settings.lock().runtime_settings()
}
