//! Realtime API wire events.
//!
//! Client events are serialized with their `type` tag. Server events the
//! gateway does not route deserialize to [`ServerEvent::Unknown`].

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Error code returned when `response.cancel` finds nothing to cancel.
pub const CANCEL_NOT_ACTIVE_CODE: &str = "response_cancel_not_active";

/// Session fields sent with `session.update`. Absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Server VAD settings. The gateway always sends `create_response` and
/// `interrupt_response` as false and drives turns itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
}

/// A message injected into the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    pub fn user_text(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                content_type: "input_text".to_string(),
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Replaces the session instructions for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Echoed back on the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// =============================================================================
// Client events
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Base64 audio in the session input format
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Without an id the server cancels whatever is in progress
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

impl ClientEvent {
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel { .. } => "response.cancel",
        }
    }
}

// =============================================================================
// Server events
// =============================================================================

/// Server events the gateway acts on. Everything else is `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: Session },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Session },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
    },

    /// Caller transcript so far, delivered as increments
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta { item_id: String, delta: String },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { item_id: String, transcript: String },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed { item_id: String, error: ApiError },

    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },

    /// Terminal for every response, whatever its status
    #[serde(rename = "response.done")]
    ResponseDone { response: Response },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { response_id: String, delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        response_id: String,
        transcript: String,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta { response_id: String, delta: String },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn is_cancel_not_active(&self) -> bool {
        self.code.as_deref() == Some(CANCEL_NOT_ACTIVE_CODE)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: String,
    /// in_progress, completed, cancelled, failed or incomplete
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl Response {
    /// Failure message from `status_details`, falling back to the status.
    pub fn failure_reason(&self) -> String {
        self.status_details
            .as_ref()
            .and_then(|d| {
                d.pointer("/error/message")
                    .or_else(|| d.get("reason"))
                    .and_then(|v| v.as_str())
            })
            .unwrap_or(self.status.as_str())
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// =============================================================================
// Tests
// =============================================================================
