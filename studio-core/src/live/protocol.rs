//! Wire shapes of the provider's bidirectional live stream.
//!
//! Outbound, after the socket opens:
//!
//! ```json
//! {"setup": {"model": "models/…", "generationConfig": {…}, …}}
//! {"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "…"}]}}
//! ```
//!
//! Inbound messages are JSON objects that may carry several payload kinds at once;
//! [`InboundMessage::parse`] flattens them into one all-optional record.

use serde::{Deserialize, Serialize};

use super::LiveConfig;
use crate::buffering::chunk::EncodedFrame;
use crate::error::{Result, StudioError};

// ── Outbound ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    output_audio_transcription: Empty,
    input_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

impl SpeechConfig {
    pub(crate) fn prebuilt(voice_name: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Default, Serialize)]
struct Empty {}

impl SetupMessage {
    pub fn from_config(config: &LiveConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO"],
                    speech_config: SpeechConfig::prebuilt(&config.voice_name),
                },
                system_instruction: config
                    .system_instruction
                    .as_ref()
                    .filter(|s| !s.trim().is_empty())
                    .map(|text| Content {
                        parts: vec![TextPart { text: text.clone() }],
                    }),
                output_audio_transcription: Empty {},
                input_audio_transcription: Empty {},
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [&'a EncodedFrame; 1],
}

/// Serialize one captured frame as a `realtimeInput` message.
pub fn realtime_input_json(frame: &EncodedFrame) -> Result<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [frame],
        },
    };
    Ok(serde_json::to_string(&message)?)
}

// ── Inbound ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    input_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

/// Everything one inbound message may carry. Each field is processed
/// independently; several may be set at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub setup_complete: bool,
    /// Transcription of the model's speech.
    pub transcript: Option<String>,
    /// Transcription of the operator's speech.
    pub input_transcript: Option<String>,
    /// Base64 PCM16 audio payloads, in part order.
    pub audio: Vec<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
    /// The server announced it will disconnect soon.
    pub go_away: bool,
}

impl InboundMessage {
    /// Parse a JSON text frame.
    ///
    /// # Errors
    /// `StudioError::Protocol` when the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: ServerMessage =
            serde_json::from_str(text).map_err(|e| StudioError::Protocol(e.to_string()))?;

        let mut message = InboundMessage {
            setup_complete: raw.setup_complete.is_some(),
            go_away: raw.go_away.is_some(),
            ..Default::default()
        };

        if let Some(content) = raw.server_content {
            message.transcript = non_empty_text(content.output_transcription);
            message.input_transcript = non_empty_text(content.input_transcription);
            message.interrupted = content.interrupted;
            message.turn_complete = content.turn_complete;
            message.audio = content
                .model_turn
                .map(|turn| turn.parts)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|part| part.inline_data)
                .filter(|inline| {
                    inline
                        .mime_type
                        .as_deref()
                        .map_or(true, |mime| mime.starts_with("audio/"))
                })
                .filter_map(|inline| inline.data)
                .filter(|data| !data.is_empty())
                .collect();
        }

        Ok(message)
    }

    /// Parse a binary frame, which carries the same JSON as UTF-8.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StudioError::Protocol(format!("binary frame is not UTF-8: {e}")))?;
        Self::parse(text)
    }

    /// True when the message carries nothing the session acts on.
    pub fn has_content(&self) -> bool {
        self.transcript.is_some()
            || self.input_transcript.is_some()
            || !self.audio.is_empty()
            || self.interrupted
    }
}

fn non_empty_text(transcription: Option<Transcription>) -> Option<String> {
    transcription
        .and_then(|t| t.text)
        .filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::chunk::pcm_mime;

    #[test]
    fn default_setup_uses_the_storefront_assistant_prompt() {
        let json = serde_json::to_value(SetupMessage::from_config(&LiveConfig::default())).unwrap();
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "You are a friendly and professional voice assistant for ArzuBazar and ShopSera. \
             Help users with order status and product info."
        );
    }

    #[test]
    fn setup_message_carries_voice_and_transcription() {
        let config = LiveConfig {
            system_instruction: Some("Be brief.".into()),
            ..LiveConfig::default()
        };
        let json = serde_json::to_value(SetupMessage::from_config(&config)).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["model"], format!("models/{}", config.model));
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(setup["outputAudioTranscription"].is_object());
        assert!(setup["inputAudioTranscription"].is_object());
    }

    #[test]
    fn realtime_input_wraps_frame_in_media_chunks() {
        let frame = EncodedFrame::new(pcm_mime(16_000), "AAAA");
        let json: serde_json::Value =
            serde_json::from_str(&realtime_input_json(&frame).unwrap()).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAA");
    }

    #[test]
    fn parses_every_payload_kind_in_one_message() {
        let raw = r#"{
            "serverContent": {
                "outputTranscription": {"text": "Your order shipped."},
                "inputTranscription": {"text": "Where is my order?"},
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "ignored"},
                    {"inlineData": {"data": "BBBB"}}
                ]},
                "interrupted": true,
                "turnComplete": true
            }
        }"#;
        let msg = InboundMessage::parse(raw).unwrap();
        assert_eq!(msg.transcript.as_deref(), Some("Your order shipped."));
        assert_eq!(msg.input_transcript.as_deref(), Some("Where is my order?"));
        assert_eq!(msg.audio, vec!["AAAA".to_string(), "BBBB".to_string()]);
        assert!(msg.interrupted);
        assert!(msg.turn_complete);
        assert!(!msg.setup_complete);
        assert!(msg.has_content());
    }

    #[test]
    fn setup_complete_and_go_away_are_flags() {
        let msg = InboundMessage::parse(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete);
        assert!(!msg.has_content());

        let msg = InboundMessage::parse_bytes(br#"{"goAway": {"timeLeft": "5s"}}"#).unwrap();
        assert!(msg.go_away);
    }

    #[test]
    fn non_audio_inline_data_and_empty_text_are_skipped() {
        let raw = r#"{"serverContent": {
            "outputTranscription": {"text": "  "},
            "modelTurn": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "CCCC"}}]}
        }}"#;
        let msg = InboundMessage::parse(raw).unwrap();
        assert!(msg.transcript.is_none());
        assert!(msg.audio.is_empty());
    }

    #[test]
    fn rejects_non_json_frames() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(StudioError::Protocol(_))
        ));
        assert!(InboundMessage::parse_bytes(&[0xff, 0xfe]).is_err());
    }
}
