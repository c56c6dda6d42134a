//! Console screens.
//!
//! Each screen runs one operation, prints the outcome and returns. A failed
//! operation becomes a single `<screen> failed: ...` error; nothing is retried.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use chrono::{DateTime, Local};
use serde::Serialize;
use studio_core::{
    audio::device::DeviceDirection,
    service::{resolve_api_key, GroundedAnswer, LatLng},
    SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::{
    ChatArgs, GroundCommand, ImageCommand, SettingsCommand, SpeakArgs, TranscribeArgs,
    VideoCommand,
};
use crate::commands;
use crate::state::AppState;

/// Shown in place of a reply when a chat turn fails.
pub const CHAT_APOLOGY: &str = "Sorry, I couldn't get an answer just now. Please try again.";

const SCREENS: &[(&str, &str)] = &[
    ("chat", "Conversation with thinking mode or fast replies"),
    ("image", "Generate images and edit them with instructions"),
    ("video", "Generate videos or analyze existing footage"),
    ("live", "Real-time voice assistant"),
    ("ground", "Answers backed by Google Search or Google Maps"),
    ("transcribe", "Speech to text from a file or the microphone"),
    ("speak", "Text to speech into a WAV file"),
    ("devices", "Microphones and speakers"),
    ("settings", "Credential, voices and defaults"),
];

fn failed(screen: &'static str) -> impl FnOnce(String) -> anyhow::Error {
    move |message| anyhow!("{screen} failed: {message}")
}

fn timestamped(prefix: &str, extension: &str) -> PathBuf {
    PathBuf::from(format!(
        "{prefix}-{}.{extension}",
        Local::now().format("%Y%m%d-%H%M%S")
    ))
}

// ── Dashboard ───────────────────────────────────────────────────────────────

pub fn dashboard(state: &AppState) {
    let settings = state.settings.lock().clone();
    println!("Studio");
    println!();
    for (name, about) in SCREENS {
        println!("  {name:<12} {about}");
    }
    println!();
    let credential = if resolve_api_key(settings.api_key.as_deref()).is_ok() {
        "configured"
    } else {
        "missing (set GEMINI_API_KEY or `studio settings set-key`)"
    };
    println!("  API key: {credential}");
    println!(
        "  Chat mode: {}",
        if settings.thinking_mode { "thinking" } else { "fast" }
    );
    println!("  Live voice: {}", settings.live_voice);
}

// ── Chat ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = match self.role {
            Role::User => "You",
            Role::Model => "AI",
        };
        write!(f, "[{}] {who}: {}", self.timestamp.format("%H:%M"), self.content)
    }
}

#[derive(Debug, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> &ChatMessage {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
            timestamp: Local::now(),
        });
        &self.messages[self.messages.len() - 1]
    }

    /// Record the outcome of a turn. A failure appends the apology so the
    /// conversation can continue.
    pub fn push_reply(&mut self, reply: &Result<String, String>) -> &ChatMessage {
        match reply {
            Ok(text) => self.push(Role::Model, text.as_str()),
            Err(_) => self.push(Role::Model, CHAT_APOLOGY),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

pub async fn chat(state: &AppState, args: ChatArgs) -> anyhow::Result<()> {
    let mut thinking = !args.fast && state.settings.lock().thinking_mode;
    let mut history = ChatHistory::default();

    if let Some(prompt) = args.prompt {
        let reply = chat_turn(state, &mut history, prompt, thinking).await;
        let text = reply.map_err(failed("chat"))?;
        if let Some(path) = &args.speak {
            speak_reply(state, &text, path).await;
        }
        return Ok(());
    }

    println!("Chat ({} mode). Commands: /think on|off, /stats, /quit", mode_name(thinking));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/think on" => thinking = true,
            "/think off" => thinking = false,
            "/stats" => {
                println!("{}", serde_json::to_string_pretty(&state.request_summary())?);
                continue;
            }
            prompt => {
                if let Ok(text) = chat_turn(state, &mut history, prompt.to_string(), thinking).await {
                    if let Some(path) = &args.speak {
                        speak_reply(state, &text, path).await;
                    }
                }
                continue;
            }
        }
        println!("Thinking mode {}", if thinking { "on" } else { "off" });
    }
    debug!(messages = history.messages().len(), "chat ended");
    Ok(())
}

async fn chat_turn(
    state: &AppState,
    history: &mut ChatHistory,
    prompt: String,
    thinking: bool,
) -> Result<String, String> {
    println!("{}", history.push(Role::User, prompt.as_str()));
    let reply = commands::chat(state, prompt, thinking).await;
    println!("{}", history.push_reply(&reply));
    reply
}

async fn speak_reply(state: &AppState, text: &str, path: &Path) {
    match commands::speak_to_file(state, text.to_string(), path.to_path_buf()).await {
        Ok(path) => println!("(spoken reply saved to {})", path.display()),
        Err(e) => eprintln!("error: speak failed: {e}"),
    }
}

fn mode_name(thinking: bool) -> &'static str {
    if thinking {
        "thinking"
    } else {
        "fast"
    }
}

// ── Image studio ────────────────────────────────────────────────────────────

pub async fn image(state: &AppState, command: ImageCommand) -> anyhow::Result<()> {
    match command {
        ImageCommand::Generate {
            prompt,
            aspect,
            size,
            out,
            edit,
        } => {
            let (default_aspect, default_size) = {
                let settings = state.settings.lock();
                (settings.image_aspect, settings.image_size)
            };
            let aspect = aspect.unwrap_or(default_aspect);
            let size = size.unwrap_or(default_size);
            println!("Generating {aspect} image at {size}...");
            let image = commands::generate_image(state, prompt, aspect, size)
                .await
                .map_err(failed("image"))?
                .ok_or_else(|| anyhow!("image failed: the model returned no image"))?;
            let path = out.unwrap_or_else(|| {
                timestamped("image", commands::extension_for_mime(&image.mime_type))
            });
            commands::save_media(&image, &path).map_err(failed("image"))?;
            println!("Saved {}", path.display());

            if let Some(instruction) = edit {
                let edited = commands::edit_image(state, instruction, image)
                    .await
                    .map_err(failed("image edit"))?
                    .ok_or_else(|| anyhow!("image edit failed: the model returned no image"))?;
                let edited_path = with_suffix(&path, "edited");
                commands::save_media(&edited, &edited_path).map_err(failed("image edit"))?;
                println!("Saved {}", edited_path.display());
            }
        }
        ImageCommand::Edit {
            image,
            instruction,
            out,
        } => {
            let source = commands::load_media(&image).map_err(failed("image edit"))?;
            let edited = commands::edit_image(state, instruction, source)
                .await
                .map_err(failed("image edit"))?
                .ok_or_else(|| anyhow!("image edit failed: the model returned no image"))?;
            let path = out.unwrap_or_else(|| with_suffix(&image, "edited"));
            commands::save_media(&edited, &path).map_err(failed("image edit"))?;
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

/// `photo.png` + `edited` → `photo-edited.png`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{suffix}.{ext}"),
        None => format!("{stem}-{suffix}"),
    };
    path.with_file_name(name)
}

// ── Video studio ────────────────────────────────────────────────────────────

pub async fn video(state: &AppState, command: VideoCommand) -> anyhow::Result<()> {
    match command {
        VideoCommand::Generate {
            prompt,
            aspect,
            start_image,
            out,
        } => {
            let aspect = aspect.unwrap_or_else(|| state.settings.lock().video_aspect);
            let start = start_image
                .as_deref()
                .map(commands::load_media)
                .transpose()
                .map_err(failed("video"))?;
            println!("Generating {aspect} video. This usually takes a few minutes...");
            let video = commands::generate_video(state, prompt, aspect, start)
                .await
                .map_err(failed("video"))?;
            let path = out.unwrap_or_else(|| {
                timestamped("video", commands::extension_for_mime(&video.mime_type))
            });
            std::fs::write(&path, &video.bytes)
                .with_context(|| format!("video failed: cannot write {}", path.display()))?;
            println!("Saved {} ({} bytes)", path.display(), video.bytes.len());
        }
        VideoCommand::Analyze { file, prompt } => {
            let media = commands::load_media(&file).map_err(failed("analyze"))?;
            let prompt = prompt.unwrap_or_else(|| "Describe this in detail.".to_string());
            let answer = commands::analyze_media(state, prompt, media)
                .await
                .map_err(failed("analyze"))?;
            println!("{answer}");
        }
    }
    Ok(())
}

// ── Live voice ──────────────────────────────────────────────────────────────

pub async fn live(state: &AppState, device: Option<String>) -> anyhow::Result<()> {
    let mut statuses = state.engine.subscribe_status();
    let mut transcripts = state.engine.subscribe_transcripts();

    commands::start_live(state, device).await.map_err(failed("live"))?;
    println!("Connecting... press Enter to hang up.");

    // Blocking stdin read on a plain thread so shutdown never waits on it.
    let engine = Arc::clone(&state.engine);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        engine.stop();
    });

    let mut last_detail = None;
    loop {
        tokio::select! {
            event = transcripts.recv() => match event {
                Ok(event) => println!("{}", event.entry),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "transcript display lagged"),
                Err(RecvError::Closed) => break,
            },
            event = statuses.recv() => match event {
                Ok(event) => {
                    match event.status {
                        SessionState::Open => println!("Connected. Speak now."),
                        SessionState::Closing => println!("Hanging up..."),
                        _ => {}
                    }
                    last_detail = event.detail;
                    if event.status.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "status display lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    while state.engine.is_running() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let diag = state.engine.diagnostics_snapshot();
    debug!(?diag, "live session diagnostics");

    match commands::live_status(state) {
        SessionState::Error => Err(anyhow!(
            "live failed: {}",
            last_detail.unwrap_or_else(|| "connection lost".into())
        )),
        _ => {
            println!(
                "Session ended. {} frames sent, {} audio chunks played.",
                diag.frames_sent, diag.chunks_scheduled
            );
            Ok(())
        }
    }
}

// ── Grounding ───────────────────────────────────────────────────────────────

pub async fn ground(state: &AppState, command: GroundCommand) -> anyhow::Result<()> {
    let answer = match command {
        GroundCommand::Search { query } => commands::search_grounding(state, query)
            .await
            .map_err(failed("search"))?,
        GroundCommand::Maps { query, lat, lng } => {
            let location = lat.zip(lng).map(|(latitude, longitude)| LatLng {
                latitude,
                longitude,
            });
            commands::maps_grounding(state, query, location)
                .await
                .map_err(failed("maps"))?
        }
    };
    print!("{}", render_grounded(&answer));
    Ok(())
}

pub fn render_grounded(answer: &GroundedAnswer) -> String {
    let mut out = format!("{}\n", answer.text.trim_end());
    if !answer.links.is_empty() {
        out.push_str("\nSources:\n");
        for (i, link) in answer.links.iter().enumerate() {
            let title = if link.title.is_empty() {
                link.uri.as_str()
            } else {
                link.title.as_str()
            };
            out.push_str(&format!("  [{}] {title} <{}>\n", i + 1, link.uri));
        }
    }
    out
}

// ── Transcription and speech ────────────────────────────────────────────────

pub async fn transcribe(state: &AppState, args: TranscribeArgs) -> anyhow::Result<()> {
    let file = match (args.file, args.record) {
        (_, Some(secs)) => {
            let device = state.settings.lock().preferred_input_device.clone();
            let path = std::env::temp_dir().join("studio-recording.wav");
            println!("Recording for {secs}s...");
            commands::record_clip(device, Duration::from_secs(secs), path)
                .await
                .map_err(failed("recording"))?
        }
        (Some(file), None) => file,
        (None, None) => bail!("transcribe failed: no audio given"),
    };
    let audio = commands::load_audio(&file).map_err(failed("transcribe"))?;
    let text = commands::transcribe(state, audio)
        .await
        .map_err(failed("transcribe"))?;
    println!("{text}");
    Ok(())
}

pub async fn speak(state: &AppState, args: SpeakArgs) -> anyhow::Result<()> {
    let path = commands::speak_to_file(state, args.text, args.out)
        .await
        .map_err(failed("speak"))?;
    println!("Saved {}", path.display());
    Ok(())
}

// ── Devices and settings ────────────────────────────────────────────────────

pub fn devices() {
    let devices = commands::list_audio_devices();
    if devices.is_empty() {
        println!("No audio devices found (built without the audio-cpal feature?)");
        return;
    }
    for device in devices {
        let direction = match device.direction {
            DeviceDirection::Input => "input ",
            DeviceDirection::Output => "output",
        };
        let marker = if device.is_default { "*" } else { " " };
        println!("{direction} {marker} {}", device.name);
    }
}

pub fn settings(state: &AppState, action: Option<SettingsCommand>) -> anyhow::Result<()> {
    let action = action.unwrap_or(SettingsCommand::Show);
    let updated = match action {
        SettingsCommand::Show => {
            let view = commands::get_runtime_settings(state);
            println!("{}", serde_json::to_string_pretty(&view)?);
            return Ok(());
        }
        SettingsCommand::Path => {
            println!("{}", state.settings_path.display());
            return Ok(());
        }
        SettingsCommand::SetKey { key } => state.update_settings(|s| s.api_key = Some(key)),
        SettingsCommand::ClearKey => state.update_settings(|s| s.api_key = None),
        SettingsCommand::SetVoice { name } => state.update_settings(|s| s.live_voice = name),
        SettingsCommand::SetTtsVoice { name } => state.update_settings(|s| s.tts_voice = name),
        SettingsCommand::SetDevice { name } => {
            state.update_settings(|s| s.preferred_input_device = name)
        }
        SettingsCommand::Thinking { enabled } => {
            state.update_settings(|s| s.thinking_mode = enabled)
        }
        SettingsCommand::SetBaseUrl { url } => state.update_settings(|s| s.base_url = url),
    }
    .with_context(|| format!("settings failed: cannot write {}", state.settings_path.display()))?;
    println!("{}", serde_json::to_string_pretty(&updated.runtime_settings())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::service::GroundingLink;

    #[test]
    fn failed_turn_appends_apology() {
        let mut history = ChatHistory::default();
        history.push(Role::User, "How many orders today?");
        let shown = history
            .push_reply(&Err("provider request failed: HTTP 500".into()))
            .content
            .clone();
        assert_eq!(shown, CHAT_APOLOGY);
        assert_eq!(history.messages().len(), 2);
        assert_eq!(history.messages()[1].role, Role::Model);
    }

    #[test]
    fn successful_turn_keeps_reply_text() {
        let mut history = ChatHistory::default();
        history.push(Role::User, "hi");
        history.push_reply(&Ok("Hello!".into()));
        let line = history.messages()[1].to_string();
        assert!(line.ends_with("AI: Hello!"));
    }

    #[test]
    fn grounded_answer_lists_sources() {
        let answer = GroundedAnswer {
            text: "Two cafes are open.".into(),
            links: vec![
                GroundingLink {
                    uri: "https://maps.example/a".into(),
                    title: "Cafe A".into(),
                },
                GroundingLink {
                    uri: "https://maps.example/b".into(),
                    title: String::new(),
                },
            ],
        };
        let out = render_grounded(&answer);
        assert!(out.contains("[1] Cafe A <https://maps.example/a>"));
        assert!(out.contains("[2] https://maps.example/b <https://maps.example/b>"));
    }

    #[test]
    fn grounded_answer_without_links_is_just_text() {
        let out = render_grounded(&GroundedAnswer {
            text: "Nothing found.".into(),
            links: Vec::new(),
        });
        assert_eq!(out, "Nothing found.\n");
    }

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(
            with_suffix(Path::new("out/photo.png"), "edited"),
            PathBuf::from("out/photo-edited.png")
        );
        assert_eq!(with_suffix(Path::new("raw"), "edited"), PathBuf::from("raw-edited"));
    }
}
