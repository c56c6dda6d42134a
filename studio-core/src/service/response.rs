//! Normalisation of provider responses.
//!
//! Only the fields the console uses are modelled; everything else is ignored.

use serde::Deserialize;

use super::types::{GroundedAnswer, GroundingLink, InlineMedia};
use crate::error::{Result, StudioError};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    inline_data: Option<InlineMedia>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    web: Option<GroundingLink>,
    maps: Option<GroundingLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Which kind of grounding chunk to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingKind {
    Web,
    Maps,
}

impl GenerateContentResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| StudioError::Protocol(e.to_string()))
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter())
            .into_iter()
            .flatten()
    }

    /// Concatenated text of the first candidate, skipping thought summaries.
    pub fn text(&self) -> String {
        self.parts()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    /// Like [`text`](Self::text) but fails when the provider returned nothing.
    pub fn require_text(&self) -> Result<String> {
        let text = self.text();
        if text.trim().is_empty() {
            return Err(StudioError::RequestFailed(self.empty_reason()));
        }
        Ok(text)
    }

    /// First inline media part of the first candidate.
    pub fn first_inline(&self) -> Option<InlineMedia> {
        self.parts().find_map(|p| p.inline_data.clone())
    }

    pub fn grounding_links(&self, kind: GroundingKind) -> Vec<GroundingLink> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|meta| {
                meta.grounding_chunks
                    .iter()
                    .filter_map(|chunk| match kind {
                        GroundingKind::Web => chunk.web.clone(),
                        GroundingKind::Maps => chunk.maps.clone(),
                    })
                    .filter(|link| !link.uri.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn grounded_answer(&self, kind: GroundingKind) -> GroundedAnswer {
        GroundedAnswer {
            text: self.text(),
            links: self.grounding_links(kind),
        }
    }

    fn empty_reason(&self) -> String {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return format!("prompt blocked: {reason}");
        }
        match self.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            Some(reason) => format!("empty response (finish reason {reason})"),
            None => "empty response".to_string(),
        }
    }
}

/// State of a long-running video operation.
#[derive(Debug, Default, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    error: Option<OperationError>,
    response: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationError {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

impl Operation {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| StudioError::Protocol(e.to_string()))
    }

    /// URI of the first generated video of a finished operation.
    ///
    /// # Errors
    /// `RequestFailed` when the operation carries an error or no video.
    pub fn video_uri(&self) -> Result<String> {
        if let Some(err) = &self.error {
            return Err(StudioError::RequestFailed(match err.code {
                Some(code) => format!("video generation failed ({code}): {}", err.message),
                None => format!("video generation failed: {}", err.message),
            }));
        }
        self.response
            .as_ref()
            .and_then(|r| {
                r.pointer("/generateVideoResponse/generatedSamples/0/video/uri")
                    .or_else(|| r.pointer("/generatedVideos/0/video/uri"))
            })
            .and_then(|uri| uri.as_str())
            .map(str::to_string)
            .ok_or_else(|| StudioError::RequestFailed("operation finished without a video".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_skips_thought_parts() {
        let body = r#"{"candidates": [{"content": {"parts": [
            {"text": "planning…", "thought": true},
            {"text": "Orders are "},
            {"text": "up 12%."}
        ]}}]}"#;
        let resp = GenerateContentResponse::parse(body).unwrap();
        assert_eq!(resp.text(), "Orders are up 12%.");
    }

    #[test]
    fn first_inline_image_is_returned() {
        let body = r#"{"candidates": [{"content": {"parts": [
            {"text": "Here you go"},
            {"inlineData": {"mimeType": "image/png", "data": "AAA"}},
            {"inlineData": {"mimeType": "image/jpeg", "data": "BBB"}}
        ]}}]}"#;
        let media = GenerateContentResponse::parse(body)
            .unwrap()
            .first_inline()
            .unwrap();
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.data, "AAA");
    }

    #[test]
    fn grounding_links_filter_by_kind() {
        let body = r#"{"candidates": [{
            "content": {"parts": [{"text": "Two shops nearby."}]},
            "groundingMetadata": {"groundingChunks": [
                {"web": {"uri": "https://a.example", "title": "A"}},
                {"maps": {"uri": "https://maps.example/1", "title": "Shop 1"}},
                {"maps": {"uri": "https://maps.example/2"}}
            ]}
        }]}"#;
        let resp = GenerateContentResponse::parse(body).unwrap();
        let web = resp.grounding_links(GroundingKind::Web);
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].title, "A");

        let answer = resp.grounded_answer(GroundingKind::Maps);
        assert_eq!(answer.text, "Two shops nearby.");
        assert_eq!(answer.links.len(), 2);
        assert_eq!(answer.links[1].title, "");
    }

    #[test]
    fn empty_response_reports_block_reason() {
        let resp =
            GenerateContentResponse::parse(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#)
                .unwrap();
        assert!(resp.first_inline().is_none());
        let err = resp.require_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn operation_yields_video_uri() {
        let body = r#"{"name": "operations/abc", "done": true, "response": {
            "generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://files.example/v.mp4"}}]}
        }}"#;
        let op = Operation::parse(body).unwrap();
        assert!(op.done);
        assert_eq!(op.video_uri().unwrap(), "https://files.example/v.mp4");
    }

    #[test]
    fn operation_error_and_missing_video_fail() {
        let failed = Operation::parse(
            r#"{"name": "operations/x", "done": true, "error": {"code": 3, "message": "bad prompt"}}"#,
        )
        .unwrap();
        assert!(matches!(failed.video_uri(), Err(StudioError::RequestFailed(m)) if m.contains("bad prompt")));

        let empty = Operation::parse(r#"{"name": "operations/y", "done": true, "response": {}}"#).unwrap();
        assert!(empty.video_uri().is_err());

        let pending = Operation::parse(r#"{"name": "operations/z"}"#).unwrap();
        assert!(!pending.done);
    }
}
